use anyhow::{Result, anyhow};

use crate::models::request::SendNotificationRequest;

const MAX_IDENTIFIER_LEN: usize = 128;

/// Outcome of checking a referenced entity against its owning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The dependency answered and the entity does not exist or is not usable.
    Invalid { reason: String },
    /// The dependency could not give an answer (circuit open, transport error, 5xx).
    Unavailable { reason: String },
}

pub fn validate_request(request: &SendNotificationRequest) -> Result<()> {
    validate_identifier("user_id", &request.user_id)?;
    validate_identifier("template_id", &request.template_id)?;
    Ok(())
}

/// Identifiers end up as a URL path segment and a cache key suffix.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field));
    }

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(anyhow!(
            "{} too long (maximum {} characters)",
            field,
            MAX_IDENTIFIER_LEN
        ));
    }

    let valid_chars = value.chars().all(|c| {
        !c.is_whitespace() && !c.is_control() && !matches!(c, '/' | '?' | '#' | '%')
    });

    if !valid_chars {
        return Err(anyhow!("{} contains invalid characters", field));
    }

    // Dot segments collapse out of a URL path and would address the parent resource.
    if matches!(value, "." | "..") {
        return Err(anyhow!("{} cannot be a relative path segment", field));
    }

    Ok(())
}

/// Correlation ids are only ever a store key suffix, so any printable text fits.
pub fn validate_correlation_id(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("correlation id cannot be empty"));
    }

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(anyhow!(
            "correlation id too long (maximum {} characters)",
            MAX_IDENTIFIER_LEN
        ));
    }

    if value.chars().any(|c| c.is_control()) {
        return Err(anyhow!("correlation id contains control characters"));
    }

    Ok(())
}
