//! URL patterns used to map paths to handlers and filters.
//!
//! Four forms are recognised:
//! - exact: `/login`
//! - path prefix: `/api/*` (also matches `/api` itself)
//! - extension: `*.html`
//! - default: `/`

use std::fmt;

use crate::error::{HostError, HostResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UrlPattern {
    Exact(String),
    /// Prefix without the trailing `/*`; empty for `/*`.
    Prefix(String),
    /// Extension without the leading dot.
    Extension(String),
    Default,
}

impl UrlPattern {
    /// Parse a URL pattern. Unknown forms are `IllegalArgument`.
    pub fn parse(pattern: &str) -> HostResult<Self> {
        let invalid = || HostError::IllegalArgument(format!("invalid URL pattern `{}`", pattern));
        match pattern {
            "" => Ok(UrlPattern::Exact("/".to_string())),
            "/" => Ok(UrlPattern::Default),
            _ => {
                if let Some(ext) = pattern.strip_prefix("*.") {
                    if ext.is_empty() || ext.contains(['/', '*', '.']) {
                        return Err(invalid());
                    }
                    return Ok(UrlPattern::Extension(ext.to_string()));
                }
                if !pattern.starts_with('/') {
                    return Err(invalid());
                }
                if let Some(prefix) = pattern.strip_suffix("/*") {
                    if prefix.contains('*') {
                        return Err(invalid());
                    }
                    return Ok(UrlPattern::Prefix(prefix.to_string()));
                }
                if pattern.contains('*') {
                    return Err(invalid());
                }
                Ok(UrlPattern::Exact(pattern.to_string()))
            }
        }
    }

    /// True when `path` (mount-relative, leading `/`) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            UrlPattern::Exact(exact) => path == exact,
            UrlPattern::Prefix(prefix) => is_path_prefix(path, prefix),
            UrlPattern::Extension(ext) => extension_of(path) == Some(ext.as_str()),
            UrlPattern::Default => true,
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(exact) => f.write_str(exact),
            UrlPattern::Prefix(prefix) => write!(f, "{}/*", prefix),
            UrlPattern::Extension(ext) => write!(f, "*.{}", ext),
            UrlPattern::Default => f.write_str("/"),
        }
    }
}

/// True when `prefix` is a prefix of `path` ending on a segment boundary.
///
/// An empty prefix matches everything.
pub fn is_path_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.is_empty() || prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Extension of the last path segment, if any.
pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    (!ext.is_empty()).then_some(ext)
}
