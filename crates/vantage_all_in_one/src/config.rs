use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Stream carrying inbound telemetry readings
    #[serde(default = "default_telemetry_stream")]
    pub telemetry_stream: String,

    /// Stream carrying outbound threshold alerts
    #[serde(default = "default_alerts_stream")]
    pub alerts_stream: String,

    /// KV bucket holding partition leases
    #[serde(default = "default_lease_bucket")]
    pub lease_bucket: String,

    /// KV bucket holding partition checkpoints
    #[serde(default = "default_checkpoint_bucket")]
    pub checkpoint_bucket: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Partition consumption
    /// Number of telemetry stream partitions
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    /// Consumer group name for this deployment
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Lease owner identity; defaults to a per-process value
    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    /// Max events fetched per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max wait for a batch in seconds
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    // Lease timers
    /// Seconds between lease acquisition attempts for unowned partitions
    #[serde(default = "default_lease_acquire_interval_secs")]
    pub lease_acquire_interval_secs: u64,

    /// Seconds between renewals of held leases
    #[serde(default = "default_lease_renew_interval_secs")]
    pub lease_renew_interval_secs: u64,

    /// Lease validity in seconds
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    // Device state
    /// History ring capacity per device
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// Default lower threshold for unconfigured devices
    #[serde(default = "default_min_threshold")]
    pub default_min_threshold: i64,

    /// Default upper threshold for unconfigured devices
    #[serde(default = "default_max_threshold")]
    pub default_max_threshold: i64,

    // Demo producer
    /// Run the simulated telemetry producer alongside the pipeline
    #[serde(default = "default_demo_producer_enabled")]
    pub demo_producer_enabled: bool,

    /// Number of simulated devices
    #[serde(default = "default_demo_device_count")]
    pub demo_device_count: u32,

    /// Seconds between simulated publishing rounds
    #[serde(default = "default_demo_interval_secs")]
    pub demo_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_telemetry_stream() -> String {
    "telemetry".to_string()
}

fn default_alerts_stream() -> String {
    "alerts".to_string()
}

fn default_lease_bucket() -> String {
    "vantage-leases".to_string()
}

fn default_checkpoint_bucket() -> String {
    "vantage-checkpoints".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// Partition consumption defaults
fn default_partition_count() -> u32 {
    4
}

fn default_consumer_group() -> String {
    "vantage".to_string()
}

fn default_owner_id() -> String {
    format!("vantage-{}", std::process::id())
}

fn default_batch_size() -> usize {
    100
}

fn default_receive_timeout_secs() -> u64 {
    30
}

// Lease timer defaults
fn default_lease_acquire_interval_secs() -> u64 {
    10
}

fn default_lease_renew_interval_secs() -> u64 {
    10
}

fn default_lease_duration_secs() -> u64 {
    30
}

// Device state defaults
fn default_queue_length() -> usize {
    100
}

fn default_min_threshold() -> i64 {
    30
}

fn default_max_threshold() -> i64 {
    50
}

// Demo producer defaults
fn default_demo_producer_enabled() -> bool {
    false
}

fn default_demo_device_count() -> u32 {
    8
}

fn default_demo_interval_secs() -> u64 {
    5
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("VANTAGE"))
            .build()?
            .try_deserialize()
    }
}
