use std::time::Duration;

use herald_events::registry::DEFAULT_OUTBOUND_BUFFER;

/// Default retention for deactivated device tokens.
const DEFAULT_TOKEN_RETENTION_DAYS: u32 = 90;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Values that fail
/// to parse are logged and replaced by their default.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on each post-shutdown cleanup step, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL. `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    /// How long deactivated device tokens are kept before deletion.
    pub token_retention_days: u32,
    pub registry: RegistryConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                    |
    /// |-------------------------------|----------------------------|
    /// | `HOST`                        | `0.0.0.0`                  |
    /// | `PORT`                        | `3000`                     |
    /// | `CORS_ORIGINS`                | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`                       |
    /// | `DATABASE_URL`                | unset (in-memory store)    |
    /// | `DEVICE_TOKEN_RETENTION_DAYS` | `90`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            token_retention_days: env_or("DEVICE_TOKEN_RETENTION_DAYS", DEFAULT_TOKEN_RETENTION_DAYS),
            registry: RegistryConfig::from_env(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Connection registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames a connection may have queued before it is treated as dead.
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl RegistryConfig {
    /// | Env Var              | Default |
    /// |----------------------|---------|
    /// | `WS_OUTBOUND_BUFFER` | `64`    |
    pub fn from_env() -> Self {
        Self {
            outbound_buffer: env_or("WS_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER).max(1),
            ..Self::default()
        }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.outbound_buffer, 64);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn unset_variable_uses_default() {
        assert_eq!(env_or("HERALD_TEST_UNSET_VARIABLE", 17u32), 17);
    }
}
