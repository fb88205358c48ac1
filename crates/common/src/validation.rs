//! Input validation for tunnel configuration and provider-supplied data
//!
//! Subdomains and domain patterns come from the command line; paths come from
//! the managed tunnel provider. Both are checked before they reach a socket.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Subdomains accepted by localtunnel-compatible relays
static SUBDOMAIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]{2,61}[a-z0-9]$").unwrap()
});

/// Exact host names or `*.` wildcards over a host suffix
static DOMAIN_PATTERN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*\.)?[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .unwrap()
});

/// Maximum length for HTTP paths
pub const MAX_PATH_LENGTH: usize = 2048;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid subdomain: {0} (use 4-63 lowercase letters, digits or inner hyphens)")]
    InvalidSubdomain(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidDomainPattern(String),

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),
}

/// Validate a requested relay subdomain
///
/// # Examples
///
/// ```
/// use ollama_bridge_common::validation::validate_subdomain;
///
/// assert!(validate_subdomain("my-llama").is_ok());
/// assert!(validate_subdomain("ABC").is_err());
/// ```
pub fn validate_subdomain(subdomain: &str) -> Result<(), ValidationError> {
    if !SUBDOMAIN_REGEX.is_match(subdomain) {
        return Err(ValidationError::InvalidSubdomain(
            subdomain.chars().take(70).collect::<String>(),
        ));
    }
    Ok(())
}

/// Validate and sanitize an HTTP path
///
/// - Removes control characters
/// - Enforces length limits
/// - Ensures path starts with /
pub fn validate_path(path: &str) -> Result<String, ValidationError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }

    let sanitized: String = path.chars().filter(|c| !c.is_control()).collect();

    if sanitized.is_empty() {
        Ok("/".to_string())
    } else if sanitized.starts_with('/') {
        Ok(sanitized)
    } else {
        Ok(format!("/{}", sanitized))
    }
}

/// Set of domains a managed tunnel is allowed to be assigned
///
/// An empty list allows any domain. A pattern is either an exact host
/// (`llm.example.com`) or a wildcard over subdomains (`*.example.com`,
/// which does not match `example.com` itself).
#[derive(Debug, Clone, Default)]
pub struct DomainAllowList {
    patterns: Vec<String>,
    matchers: Vec<Regex>,
}

impl DomainAllowList {
    /// Compile the given patterns
    pub fn parse<I, S>(patterns: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_ascii_lowercase();
            if !DOMAIN_PATTERN_REGEX.is_match(&pattern) {
                return Err(ValidationError::InvalidDomainPattern(pattern));
            }

            let source = match pattern.strip_prefix("*.") {
                Some(suffix) => format!(r"^([a-z0-9-]+\.)+{}$", regex::escape(suffix)),
                None => format!("^{}$", regex::escape(&pattern)),
            };
            let matcher = Regex::new(&source)
                .map_err(|_| ValidationError::InvalidDomainPattern(pattern.clone()))?;

            list.patterns.push(pattern);
            list.matchers.push(matcher);
        }

        Ok(list)
    }

    /// Whether the list places no restriction at all
    pub fn is_unrestricted(&self) -> bool {
        self.matchers.is_empty()
    }

    /// The patterns as given, lowercased
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Check a host name against the list
    pub fn is_allowed(&self, host: &str) -> bool {
        if self.is_unrestricted() {
            return true;
        }

        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.matchers.iter().any(|m| m.is_match(&host))
    }
}
