//! Run-scoped degraded flags for the external services

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// The two external capabilities the pipeline calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Discovery,
    Generation,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => crate::config::DISCOVERY_SERVICE,
            Self::Generation => crate::config::GENERATION_SERVICE,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct ServiceFlag {
    degraded: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Degraded flags owned by one pipeline run.
///
/// A flag only ever goes from healthy to degraded.
#[derive(Debug, Default)]
pub struct ServiceHealth {
    discovery: ServiceFlag,
    generation: ServiceFlag,
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, service: ServiceKind) -> &ServiceFlag {
        match service {
            ServiceKind::Discovery => &self.discovery,
            ServiceKind::Generation => &self.generation,
        }
    }

    pub fn is_degraded(&self, service: ServiceKind) -> bool {
        self.flag(service).degraded.load(Ordering::SeqCst)
    }

    /// Mark a service degraded. Returns true only for the call that flipped the flag.
    pub fn mark_degraded(&self, service: ServiceKind, reason: impl Into<String>) -> bool {
        let flag = self.flag(service);
        let flipped = flag
            .degraded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if flipped {
            *flag.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
        }
        flipped
    }

    /// Reason recorded by the call that degraded the service
    pub fn reason(&self, service: ServiceKind) -> Option<String> {
        self.flag(service)
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of all degraded services
    pub fn degraded_services(&self) -> Vec<String> {
        [ServiceKind::Discovery, ServiceKind::Generation]
            .into_iter()
            .filter(|service| self.is_degraded(*service))
            .map(|service| service.as_str().to_string())
            .collect()
    }
}
