//! Configuration module for the tcpmux server.
//!
//! Settings come from command-line arguments and a line-oriented
//! configuration file. CLI arguments take precedence over file values.
//!
//! ```text
//! # comment
//! $port = 1
//! $log_level = debug
//!
//! echo    NET   127.0.0.1 7
//! date    LOCAL /bin/date -u
//! ```
//!
//! Lines starting with `$` set a variable, every other non-blank line defines
//! a service as `<NAME> <TYPE> <fields...>`. Malformed service lines are
//! dropped.

use crate::directory::ServiceDirectory;
use crate::service::{NetworkService, ProcessService, Service};
use clap::Parser;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// IANA-assigned TCPMUX port
pub const TCPMUX_PORT: u16 = 1;

/// Command-line arguments for the multiplexer
#[derive(Parser, Debug)]
#[command(name = "tcpmux")]
#[command(author = "tcpmux authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCPMUX (RFC 1078) service multiplexer", long_about = None)]
pub struct CliArgs {
    /// Path to the service configuration file
    #[arg(default_value = "tcpmux.conf")]
    pub config: PathBuf,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'l', long)]
    pub listen: Option<IpAddr>,

    /// Port to listen on (defaults to the TCPMUX port, 1)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parsed configuration file
#[derive(Debug, Default)]
pub struct ConfigFile {
    /// `$key = value` definitions, including unrecognized keys
    pub vars: HashMap<String, String>,
    /// Service definitions
    pub directory: ServiceDirectory,
}

impl ConfigFile {
    /// Read and parse a configuration file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Ok(Self::parse(&contents))
    }

    /// Parse configuration text. Never fails; bad lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut config = ConfigFile::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(definition) = line.strip_prefix('$') {
                let (key, value) = parse_variable(definition);
                config.vars.insert(key.to_string(), value.to_string());
            } else if let Some((name, service)) = parse_service(line) {
                config.directory.insert(&name, service);
            } else {
                debug!(line, "Ignoring malformed service definition");
            }
        }

        config
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// `$port`, if set and valid
    pub fn port(&self) -> Option<u16> {
        parse_var(self.var("port"), "port")
    }

    /// `$listen`, if set and valid
    pub fn listen(&self) -> Option<IpAddr> {
        parse_var(self.var("listen"), "listen")
    }

    /// `$workers`, if set and valid
    pub fn workers(&self) -> Option<usize> {
        parse_var(self.var("workers"), "workers")
    }

    /// `$log_level`, if set
    pub fn log_level(&self) -> Option<&str> {
        self.var("log_level").filter(|level| !level.is_empty())
    }
}

fn parse_var<T>(value: Option<&str>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value = value?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, value, error = %e, "Invalid configuration value, using default");
            None
        }
    }
}

/// Split `key = value`. A missing `=` leaves the value empty.
fn parse_variable(definition: &str) -> (&str, &str) {
    let (key, value) = definition.split_once('=').unwrap_or((definition, ""));
    (key.trim(), value.trim())
}

/// Parse `<NAME> <TYPE> <fields...>` into an upper-cased name and a service.
fn parse_service(line: &str) -> Option<(String, Service)> {
    let mut fields = line.split_whitespace();
    let name = fields.next()?.to_uppercase();
    let kind = fields.next()?.to_uppercase();
    let fields: Vec<&str> = fields.collect();

    let service = match kind.as_str() {
        "NET" => parse_net_service(&fields)?,
        "LOCAL" => parse_local_service(&fields)?,
        _ => return None,
    };
    Some((name, service))
}

fn parse_net_service(fields: &[&str]) -> Option<Service> {
    let [ip, port, ..] = fields else {
        return None;
    };
    let ip: IpAddr = ip.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    Some(Service::Network(NetworkService::new(SocketAddr::new(ip, port))))
}

fn parse_local_service(fields: &[&str]) -> Option<Service> {
    let (path, args) = fields.split_first()?;
    let args = args.iter().map(|arg| arg.to_string()).collect();
    Some(Service::Process(ProcessService::new(*path, args)))
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: Option<usize>,
    pub log_level: String,
    pub directory: ServiceDirectory,
}

impl Config {
    /// Log level to start logging with, before the rest is resolved.
    pub fn log_level(cli: &CliArgs, file: &ConfigFile) -> String {
        match file.log_level() {
            Some(level) if cli.log_level == "info" => level.to_string(),
            _ => cli.log_level.clone(),
        }
    }

    /// Merge CLI args with the configuration file (CLI takes precedence).
    pub fn resolve(cli: CliArgs, file: ConfigFile) -> Self {
        let log_level = Self::log_level(&cli, &file);
        let ip = cli
            .listen
            .or_else(|| file.listen())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = cli.port.or_else(|| file.port()).unwrap_or(TCPMUX_PORT);

        Config {
            listen: SocketAddr::new(ip, port),
            workers: cli.workers.or_else(|| file.workers()),
            log_level,
            directory: file.directory,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead(_, e) => Some(e),
        }
    }
}
