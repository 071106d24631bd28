//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, workers > 0, addresses parse)
//! - Detect conflicting deployments (duplicate names, duplicate mount keys)
//! - Check URL patterns and filter mappings of every declared unit
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HostConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::application::unit::derive_mount;
use crate::config::schema::HostConfig;
use crate::dispatch::pattern::UrlPattern;
use crate::http::cookie::is_valid_cookie_name;

/// One semantic problem, with the dotted path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &HostConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.pool.workers_per_application == 0 {
        errors.push(ValidationError::new("pool.workers_per_application", "must be greater than 0"));
    }
    if config.dispatch.async_timeout_ms == 0 {
        errors.push(ValidationError::new("dispatch.async_timeout_ms", "must be greater than 0"));
    }
    if config.dispatch.default_encoding.trim().is_empty() {
        errors.push(ValidationError::new("dispatch.default_encoding", "must not be empty"));
    }
    if !is_valid_cookie_name(&config.session.cookie_name) {
        errors.push(ValidationError::new(
            "session.cookie_name",
            format!("`{}` is not a valid cookie name", config.session.cookie_name),
        ));
    }
    if config.session.url_parameter.is_empty()
        || config.session.url_parameter.contains(['&', '=', '?', '#', ' '])
    {
        errors.push(ValidationError::new(
            "session.url_parameter",
            format!("`{}` is not a valid parameter name", config.session.url_parameter),
        ));
    }

    let mut names = HashSet::new();
    let mut mounts = HashSet::new();
    for (i, unit) in config.applications.iter().enumerate() {
        let prefix = format!("applications[{}]", i);

        if unit.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", prefix), "must not be empty"));
        } else if !names.insert(unit.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                format!("duplicate application name `{}`", unit.name),
            ));
        }

        let mount = derive_mount(&unit.name, unit.mount.as_deref());
        if !mounts.insert(mount.clone()) {
            errors.push(ValidationError::new(
                format!("{}.mount", prefix),
                format!("duplicate mount key `{}`", if mount.is_empty() { "/" } else { &mount }),
            ));
        }

        for (j, handler) in unit.handlers.iter().enumerate() {
            check_patterns(&mut errors, &format!("{}.handlers[{}]", prefix, j), &handler.url_patterns);
        }
        for (j, filter) in unit.filters.iter().enumerate() {
            let field = format!("{}.filters[{}]", prefix, j);
            check_patterns(&mut errors, &field, &filter.url_patterns);
            if filter.url_patterns.is_empty() && filter.handler_names.is_empty() {
                errors.push(ValidationError::new(field, "needs url_patterns or handler_names"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_patterns(errors: &mut Vec<ValidationError>, field: &str, patterns: &[String]) {
    for pattern in patterns {
        if let Err(err) = UrlPattern::parse(pattern) {
            errors.push(ValidationError::new(format!("{}.url_patterns", field), err.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::descriptor::{FilterDescriptor, HandlerDescriptor, UnitDescriptor};

    fn unit(name: &str) -> UnitDescriptor {
        UnitDescriptor {
            name: name.to_string(),
            ..UnitDescriptor::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&HostConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = HostConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.session.cookie_name = "bad name".into();
        config.dispatch.default_encoding = " ".into();
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["listener.bind_address", "dispatch.default_encoding", "session.cookie_name"]
        );
    }

    #[test]
    fn duplicate_mounts_are_rejected() {
        let mut config = HostConfig::default();
        config.applications = vec![unit("shop.war"), unit("shop")];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("/shop"));
    }

    #[test]
    fn checks_patterns_and_filter_mappings() {
        let mut app = unit("app");
        app.handlers.push(HandlerDescriptor {
            name: "h".into(),
            kind: "static".into(),
            url_patterns: vec!["no-slash".into()],
            ..HandlerDescriptor::default()
        });
        app.filters.push(FilterDescriptor {
            name: "f".into(),
            kind: "x".into(),
            ..FilterDescriptor::default()
        });
        let mut config = HostConfig::default();
        config.applications = vec![app];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "applications[0].handlers[0].url_patterns");
        assert_eq!(errors[1].field, "applications[0].filters[0]");
    }
}
