//! # Service Instances
//!
//! Picking the instance of a service to call is the job of a [`ServiceInstanceProvider`].
//! The executor only asks it for "the next one"; balancing is entirely up to the provider.
use http::Uri;
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// One reachable instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    uri: Uri,
}

impl ServiceInstance {
    pub fn new(uri: Uri) -> Self {
        Self { uri }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl FromStr for ServiceInstance {
    type Err = http::uri::InvalidUri;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(Uri::from_str(s)?))
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uri.fmt(f)
    }
}

/// Source of service instances. Each call may return a different one.
pub trait ServiceInstanceProvider: Send + Sync {
    fn next_instance(&self) -> Option<ServiceInstance>;
}

impl<F> ServiceInstanceProvider for F
where
    F: Fn() -> Option<ServiceInstance> + Send + Sync,
{
    fn next_instance(&self) -> Option<ServiceInstance> {
        self()
    }
}

/// Round-robin over a static list of instances.
#[derive(Debug, Default)]
pub struct RoundRobin {
    instances: Vec<ServiceInstance>,
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self {
            instances,
            next: AtomicUsize::new(0),
        }
    }

    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl ServiceInstanceProvider for RoundRobin {
    fn next_instance(&self) -> Option<ServiceInstance> {
        if self.instances.is_empty() {
            return None;
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        self.instances.get(index).cloned()
    }
}
