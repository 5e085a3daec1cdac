//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, thresholds ascending)
//! - Catch placeholder secrets before they reach production
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use crate::config::schema::GatewayConfig;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError {
            field: "listener.bind_address",
            message: format!("'{}' is not a socket address", config.listener.bind_address),
        });
    }

    if Url::parse(&config.provider.base_url).is_err() {
        errors.push(ValidationError {
            field: "provider.base_url",
            message: format!("'{}' is not a valid URL", config.provider.base_url),
        });
    }

    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError {
            field: "rate_limit.window_secs",
            message: "window must be positive".to_string(),
        });
    }
    if config.rate_limit.default_limit == 0 || config.rate_limit.auth_limit == 0 {
        errors.push(ValidationError {
            field: "rate_limit",
            message: "budgets must be positive".to_string(),
        });
    }

    if config.brute_force.steps.is_empty() {
        errors.push(ValidationError {
            field: "brute_force.steps",
            message: "at least one backoff step is required".to_string(),
        });
    }
    let ascending = config
        .brute_force
        .steps
        .windows(2)
        .all(|pair| pair[0].failures < pair[1].failures);
    if !ascending {
        errors.push(ValidationError {
            field: "brute_force.steps",
            message: "thresholds must be strictly ascending".to_string(),
        });
    }

    if config.cleanup.interval_calls == 0 || config.cleanup.interval_secs == 0 {
        errors.push(ValidationError {
            field: "cleanup",
            message: "intervals must be positive".to_string(),
        });
    }

    if config.observability.buffer_capacity == 0 {
        errors.push(ValidationError {
            field: "observability.buffer_capacity",
            message: "ring buffers need a positive capacity".to_string(),
        });
    }

    if config.admin.enabled && config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        errors.push(ValidationError {
            field: "admin.api_key",
            message: "placeholder API key must be changed".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
