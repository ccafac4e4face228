//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`DispatchConfig`] that cannot
//! be expressed through the type system alone (range checks, unique backend
//! ids, well-formed endpoints).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;

use super::DispatchConfig;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "coordinator.invoke_timeout_ms").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn zero_duration(field: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: "0".into(),
        reason: "must be at least 1ms".into(),
    }
}

/// Validate all semantic constraints on a [`DispatchConfig`].
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &DispatchConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Timeouts ─────────────────────────────────────────────────────
    if config.coordinator.invoke_timeout_ms == 0 {
        errors.push(zero_duration("coordinator.invoke_timeout_ms"));
    }
    if config.coordinator.requeue_backoff_ms == 0 {
        errors.push(zero_duration("coordinator.requeue_backoff_ms"));
    }
    if config.health.interval_ms == 0 {
        errors.push(zero_duration("health.interval_ms"));
    }
    if config.health.probe_timeout_ms == 0 {
        errors.push(zero_duration("health.probe_timeout_ms"));
    }
    if config.routing.probe_cache_ttl_ms == 0 {
        errors.push(zero_duration("routing.probe_cache_ttl_ms"));
    }

    if !config.health.path.starts_with('/') {
        errors.push(ConfigError::InvalidField {
            field: "health.path".into(),
            value: config.health.path.clone(),
            reason: "must start with '/'".into(),
        });
    }

    // ── Backends ─────────────────────────────────────────────────────
    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        if backend.id.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("backends[{i}].id"),
                value: String::new(),
                reason: "backend id must not be empty".into(),
            });
        } else if !seen.insert(backend.id.as_str()) {
            errors.push(ConfigError::InvalidField {
                field: format!("backends[{i}].id"),
                value: backend.id.clone(),
                reason: "duplicate backend id".into(),
            });
        }

        if !is_http_url(&backend.endpoint) {
            errors.push(ConfigError::InvalidField {
                field: format!("backends[{i}].endpoint"),
                value: backend.endpoint.clone(),
                reason: "must start with http:// or https://".into(),
            });
        }

        if backend.capabilities.is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("backends[{i}].capabilities"),
                value: "[]".into(),
                reason: "at least one capability tag is required".into(),
            });
        }

        if backend.max_load == 0 {
            errors.push(ConfigError::InvalidField {
                field: format!("backends[{i}].max_load"),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
    }

    // ── Routing locations ────────────────────────────────────────────
    for (name, location) in [("edge", &config.routing.edge), ("cloud", &config.routing.cloud)] {
        if !is_http_url(&location.endpoint) {
            errors.push(ConfigError::InvalidField {
                field: format!("routing.{name}.endpoint"),
                value: location.endpoint.clone(),
                reason: "must start with http:// or https://".into(),
            });
        }
    }

    if config.server.max_request_size == 0 {
        errors.push(ConfigError::InvalidField {
            field: "server.max_request_size".into(),
            value: "0".into(),
            reason: "must be at least 1 byte".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn backend(id: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            endpoint: "http://127.0.0.1:9000".to_string(),
            capabilities: vec!["llm".to_string()],
            max_load: 2,
        }
    }

    fn valid_config() -> DispatchConfig {
        DispatchConfig {
            backends: vec![backend("a"), backend("b")],
            ..DispatchConfig::default()
        }
    }

    fn has_field(errors: &[ConfigError], wanted: &str) -> bool {
        errors.iter().any(|e| match e {
            ConfigError::InvalidField { field, .. } => field == wanted,
            _ => false,
        })
    }

    #[test]
    fn test_validate_default_config_passes() {
        assert!(validate(&DispatchConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_zero_invoke_timeout_fails() {
        let mut cfg = valid_config();
        cfg.coordinator.invoke_timeout_ms = 0;
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "coordinator.invoke_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_backoff_fails() {
        let mut cfg = valid_config();
        cfg.coordinator.requeue_backoff_ms = 0;
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "coordinator.requeue_backoff_ms"));
    }

    #[test]
    fn test_validate_zero_health_interval_fails() {
        let mut cfg = valid_config();
        cfg.health.interval_ms = 0;
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "health.interval_ms"));
    }

    #[test]
    fn test_validate_health_path_without_slash_fails() {
        let mut cfg = valid_config();
        cfg.health.path = "health".to_string();
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "health.path"));
    }

    #[test]
    fn test_validate_duplicate_backend_id_fails() {
        let mut cfg = valid_config();
        cfg.backends.push(backend("a"));
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "backends[2].id"));
    }

    #[test]
    fn test_validate_empty_backend_id_fails() {
        let mut cfg = valid_config();
        cfg.backends[0].id = "  ".to_string();
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "backends[0].id"));
    }

    #[test]
    fn test_validate_bad_endpoint_scheme_fails() {
        let mut cfg = valid_config();
        cfg.backends[1].endpoint = "ftp://host".to_string();
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "backends[1].endpoint"));
    }

    #[test]
    fn test_validate_empty_capabilities_fails() {
        let mut cfg = valid_config();
        cfg.backends[0].capabilities.clear();
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "backends[0].capabilities"));
    }

    #[test]
    fn test_validate_zero_max_load_fails() {
        let mut cfg = valid_config();
        cfg.backends[0].max_load = 0;
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "backends[0].max_load"));
    }

    #[test]
    fn test_validate_bad_routing_endpoint_fails() {
        let mut cfg = valid_config();
        cfg.routing.cloud.endpoint = "cloud.example.com".to_string();
        let errors = validate(&cfg).unwrap_err();
        assert!(has_field(&errors, "routing.cloud.endpoint"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut cfg = valid_config();
        cfg.coordinator.invoke_timeout_ms = 0;
        cfg.health.probe_timeout_ms = 0;
        cfg.backends[0].max_load = 0;
        let errors = validate(&cfg).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_invalid_field_display_includes_path_and_value() {
        let err = ConfigError::InvalidField {
            field: "backends[0].max_load".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("backends[0].max_load"));
        assert!(msg.contains("must be at least 1"));
    }
}
