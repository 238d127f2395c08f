//! Service directory.
//!
//! Maps upper-cased service names to the backend that serves them. The
//! directory is filled once from configuration and then shared read-only
//! (behind an `Arc`) by every connection handler, so lookups need no locking.

use crate::service::Service;
use std::collections::BTreeMap;

/// Immutable name to service mapping.
///
/// Names are kept sorted, which is also the order `HELP` lists them in.
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    services: BTreeMap<String, Service>,
}

impl ServiceDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service, replacing any earlier definition with the same name.
    pub fn insert(&mut self, name: &str, service: Service) -> Option<Service> {
        self.services.insert(name.to_uppercase(), service)
    }

    /// Look up a service by its upper-cased name
    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Service names in listing order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Names and services in listing order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Service)> {
        self.services
            .iter()
            .map(|(name, service)| (name.as_str(), service))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, Service)> for ServiceDirectory {
    fn from_iter<I: IntoIterator<Item = (S, Service)>>(iter: I) -> Self {
        let mut directory = ServiceDirectory::new();
        for (name, service) in iter {
            directory.insert(name.as_ref(), service);
        }
        directory
    }
}
