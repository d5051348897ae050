//! Service handler registry.
//!
//! A service is a named bundle of methods invoked by `Service.Method`
//! commands with positional JSON arguments. Methods may do async work
//! and fail; failures become error responses, never connection faults.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Failure from a service method invocation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("method not found: {0}")]
    UnknownMethod(String),

    #[error("{0}")]
    Failed(String),
}

impl ServiceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Boxed future returned by service methods.
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ServiceError>> + Send + 'a>>;

/// A server-resident handler bundle.
pub trait Service: Send + Sync {
    /// Invokes `method` with positional `params`.
    ///
    /// Return `ServiceError::UnknownMethod` for a method this service
    /// does not expose; the router reports it distinctly from a handler
    /// failure.
    fn call<'a>(&'a self, method: &'a str, params: Vec<Value>) -> ServiceFuture<'a>;
}

/// Mapping from service name to handler, fixed at startup.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, service: Arc<dyn Service>) -> &mut Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Looks up a service by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    /// Registered service names.
    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
