//! Feature registry.
//!
//! Two ordered collections with configured capacities: event names the
//! device may emit, and invocable methods with their handlers. Insertion
//! order is preserved for the declare manifest; dispatch is an exact,
//! case-sensitive name match.

use std::collections::BTreeMap;

use log::info;

use crate::config::FeatureLimits;
use crate::error::RegistryError;

use super::session::Responder;

/// One inbound invocation, built per message and dropped after dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureCall {
    pub device_id: String,
    pub feature_name: String,
    /// String-valued parameters only; other JSON types are skipped.
    pub params: BTreeMap<String, String>,
}

impl FeatureCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Local handler for an invocable method.
///
/// Runs synchronously on the tick loop. The [`Responder`] publishes the
/// `feature_response` for this call and can emit events.
pub type FeatureHandler = Box<dyn FnMut(&FeatureCall, &mut Responder<'_>) + Send>;

pub struct FeatureRegistry {
    limits: FeatureLimits,
    events: Vec<String>,
    methods: Vec<(String, FeatureHandler)>,
}

impl FeatureRegistry {
    pub fn new(limits: FeatureLimits) -> Self {
        Self {
            limits,
            events: Vec::with_capacity(limits.max_events),
            methods: Vec::with_capacity(limits.max_methods),
        }
    }

    /// Advertise an event name in the declare manifest.
    pub fn add_event(&mut self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.events.iter().any(|e| e == name) {
            return Err(RegistryError::Duplicate);
        }
        if self.events.len() >= self.limits.max_events {
            return Err(RegistryError::Full);
        }
        self.events.push(name.into());
        info!("Registry: event '{}' added", name);
        Ok(())
    }

    /// Register an invocable method.
    pub fn add_method<F>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        F: FnMut(&FeatureCall, &mut Responder<'_>) + Send + 'static,
    {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.has_method(name) {
            return Err(RegistryError::Duplicate);
        }
        if self.methods.len() >= self.limits.max_methods {
            return Err(RegistryError::Full);
        }
        self.methods.push((name.into(), Box::new(handler)));
        info!("Registry: method '{}' added", name);
        Ok(())
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(String::as_str)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(n, _)| n.as_str())
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|(n, _)| n == name)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Run the handler registered under `call.feature_name`.
    ///
    /// Returns `false` if no such method exists.
    pub fn dispatch(&mut self, call: &FeatureCall, responder: &mut Responder<'_>) -> bool {
        match self.methods.iter_mut().find(|(n, _)| *n == call.feature_name) {
            Some((_, handler)) => {
                handler(call, responder);
                true
            }
            None => false,
        }
    }
}
