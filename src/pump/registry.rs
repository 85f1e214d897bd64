//! # Message Pump Registry
//!
//! Pumps registered by job id, and the circuit-breaker control surface
//! handlers use to pause and resume message retrieval of a pump.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::circuit_breaker::MessagePumpCircuitState;
use super::message_pump::MessagePump;
use crate::config::MessagePumpCircuitBreakerOptions;
use crate::error::{BusrouteError, BusrouteResult};

/// Registry of message pumps keyed by job id
#[derive(Debug, Default)]
pub struct MessagePumpRegistry {
    pumps: DashMap<String, Arc<dyn MessagePump>>,
}

impl MessagePumpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pump; job ids are unique within a registry
    pub fn register(&self, pump: Arc<dyn MessagePump>) -> BusrouteResult<()> {
        let job_id = pump.job_id().to_string();
        match self.pumps.entry(job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BusrouteError::invalid_argument(format!(
                "a message pump with job id '{job_id}' is already registered"
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(pump);
                debug!(job_id = %job_id, "Message pump registered");
                Ok(())
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<dyn MessagePump>> {
        self.pumps.get(job_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, job_id: &str) -> Option<Arc<dyn MessagePump>> {
        self.pumps.remove(job_id).map(|(_, pump)| pump)
    }

    /// Registered job ids, sorted
    pub fn job_ids(&self) -> Vec<String> {
        let mut job_ids: Vec<String> = self.pumps.iter().map(|entry| entry.key().clone()).collect();
        job_ids.sort();
        job_ids
    }

    pub fn len(&self) -> usize {
        self.pumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pumps.is_empty()
    }

    /// Start every registered pump, returning the first failure
    pub async fn start_all(&self) -> BusrouteResult<()> {
        for pump in self.snapshot() {
            pump.start().await?;
        }
        Ok(())
    }

    /// Stop every registered pump; failures are logged and the rest still stop
    pub async fn stop_all(&self) {
        let pumps = self.snapshot();
        info!(pumps = pumps.len(), "Stopping all message pumps");
        for pump in pumps {
            if let Err(e) = pump.stop().await {
                warn!(job_id = %pump.job_id(), error = %e, "Failed to stop message pump");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn MessagePump>> {
        self.pumps.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

/// Pauses and resumes message retrieval of registered pumps by job id
#[derive(Debug, Clone)]
pub struct MessagePumpCircuitBreaker {
    registry: Arc<MessagePumpRegistry>,
}

impl MessagePumpCircuitBreaker {
    pub fn new(registry: Arc<MessagePumpRegistry>) -> Self {
        Self { registry }
    }

    fn pump(&self, job_id: &str) -> BusrouteResult<Arc<dyn MessagePump>> {
        if job_id.trim().is_empty() {
            return Err(BusrouteError::invalid_argument(
                "job id is required to control a message pump circuit",
            ));
        }
        self.registry
            .get(job_id)
            .ok_or_else(|| BusrouteError::PumpNotFound(job_id.to_string()))
    }

    /// Open the circuit of the pump with `job_id`; `configure` adjusts the
    /// pump's configured circuit timings for this pause
    pub async fn pause_message_processing<F>(&self, job_id: &str, configure: F) -> BusrouteResult<()>
    where
        F: FnOnce(&mut MessagePumpCircuitBreakerOptions),
    {
        let pump = self.pump(job_id)?;
        let mut options = pump
            .circuit_state()
            .map(|state| state.options().clone())
            .unwrap_or_default();
        configure(&mut options);
        options.validate()?;

        pump.notify_pause_receive_messages(options).await
    }

    /// Close the circuit of the pump with `job_id`
    pub async fn resume_message_processing(&self, job_id: &str) -> BusrouteResult<()> {
        self.pump(job_id)?.notify_resume_retrieving_messages().await
    }

    /// Circuit state of the pump with `job_id`
    pub fn get_circuit_state(&self, job_id: &str) -> BusrouteResult<MessagePumpCircuitState> {
        let pump = self.pump(job_id)?;
        pump.circuit_state().ok_or_else(|| {
            BusrouteError::InvalidState(format!("message pump '{job_id}' has no circuit breaker"))
        })
    }
}
