//! Per-host tunables (spec §5, §SPEC_FULL ambient config section),
//! deserialized from the control plane's TOML config the way the teacher's
//! `WorkerConfiguration` is threaded into `Instance::new`.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub max_memory_mb: u64,
    pub route_deadline_ms: u64,
    pub job_deadline_ms: u64,
    pub shutdown_grace_ms: u64,
    pub log_ring_capacity: usize,
    pub pool_size: usize,
    pub pool_capacity: usize,
    pub ui_request_timeout_ms: u64,
    pub scheduler_admission_timeout_ms: u64,
    pub dispatcher_queue_capacity: usize,
    pub ws_send_buffer: usize,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            max_memory_mb: 128,
            route_deadline_ms: 30_000,
            job_deadline_ms: 60_000,
            shutdown_grace_ms: 5_000,
            log_ring_capacity: 5_000,
            pool_size: 5,
            pool_capacity: 20,
            ui_request_timeout_ms: 5 * 60 * 1000,
            scheduler_admission_timeout_ms: 2_000,
            dispatcher_queue_capacity: 4_096,
            ws_send_buffer: 1_024,
        }
    }
}

impl InstanceConfig {
    pub fn route_deadline(&self) -> Duration {
        Duration::from_millis(self.route_deadline_ms)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn ui_request_timeout(&self) -> Duration {
        Duration::from_millis(self.ui_request_timeout_ms)
    }

    pub fn scheduler_admission_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler_admission_timeout_ms)
    }
}
