//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub settlement: SettlementConfig,
    pub retry: RetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

/// Payment gateway configuration
///
/// Credentials and webhook verification parameters for the external
/// payment gateway. These are deployment secrets, not business logic.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Gateway API base URL
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Gateway API secret key
    pub secret_key: String,

    /// Webhook signing secret used for HMAC verification
    pub webhook_secret: String,

    /// Maximum age of a signed webhook timestamp in seconds
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,

    /// Request timeout for gateway calls in milliseconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_ms: u64,
}

fn default_gateway_url() -> String {
    "https://api.paygate.example.com".to_string()
}

fn default_signature_tolerance() -> i64 {
    300
}

fn default_gateway_timeout() -> u64 {
    10_000
}

/// Settlement configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Therapist payout rate in basis points (9000 = 90%)
    #[serde(default = "default_payout_rate_bps")]
    pub payout_rate_bps: i64,

    /// Hours after session end before auto-completion kicks in
    #[serde(default = "default_auto_complete_grace")]
    pub auto_complete_grace_hours: i64,

    /// Auto-completion sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum sessions processed per sweep tick
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: i64,
}

fn default_payout_rate_bps() -> i64 {
    9000
}

fn default_auto_complete_grace() -> i64 {
    24
}

fn default_sweep_interval() -> u64 {
    900
}

fn default_sweep_batch() -> i64 {
    100
}

/// Retry configuration for gateway calls
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between attempts in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each attempt
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    5_000
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("gateway.base_url", "https://api.paygate.example.com")?
            .set_default("gateway.signature_tolerance_secs", 300)?
            .set_default("gateway.timeout_ms", 10_000)?
            .set_default("settlement.payout_rate_bps", 9000)?
            .set_default("settlement.auto_complete_grace_hours", 24)?
            .set_default("settlement.sweep_interval_secs", 900)?
            .set_default("settlement.sweep_batch_size", 100)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.initial_delay_ms", 200)?
            .set_default("retry.backoff_multiplier", 2.0)?
            .set_default("retry.max_delay_ms", 5_000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with SERENA_ prefix
            .add_source(
                Environment::with_prefix("SERENA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SERENA").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            payout_rate_bps: 9000,
            auto_complete_grace_hours: 24,
            sweep_interval_secs: 900,
            sweep_batch_size: 100,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settlement_config() {
        let config = SettlementConfig::default();
        assert_eq!(config.payout_rate_bps, 9000);
        assert_eq!(config.auto_complete_grace_hours, 24);
    }

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.backoff_multiplier >= 1.0);
    }
}
