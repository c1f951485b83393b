//! Issuer-domain-name validation.
//!
//! Names offered by a certificate authority are expected to be canonical
//! lowercase A-labels and are only validated. Names typed by an operator go
//! through [`normalize_user_supplied`] first.

use thiserror::Error;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssuerNameError {
    #[error("issuer-domain-name is empty")]
    Empty,

    #[error("issuer-domain-name {0:?} must be lowercase")]
    NotLowercase(String),

    #[error("issuer-domain-name {0:?} must not end with a dot")]
    TrailingDot(String),

    #[error("issuer-domain-name is {len} octets long (max 253)")]
    TooLong { len: usize },

    #[error("issuer-domain-name {0:?} contains an empty label")]
    EmptyLabel(String),

    #[error("label {label:?} is {len} octets long (max 63)")]
    LabelTooLong { label: String, len: usize },

    #[error("label {0:?} is not a valid LDH label")]
    InvalidLabel(String),

    #[error("issuer-domain-name {name:?} is not in canonical A-label form")]
    NonCanonical { name: String },

    #[error("issuer-domain-name {name:?} cannot be converted to A-labels: {reason}")]
    Idna { name: String, reason: String },
}

/// Check `name` against every issuer-domain-name rule, stopping at the first
/// violation.
pub fn validate(name: &str) -> Result<(), IssuerNameError> {
    if name.is_empty() {
        return Err(IssuerNameError::Empty);
    }
    if name != name.to_lowercase() {
        return Err(IssuerNameError::NotLowercase(name.to_string()));
    }
    if name.ends_with('.') {
        return Err(IssuerNameError::TrailingDot(name.to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(IssuerNameError::TooLong { len: name.len() });
    }

    for label in name.split('.') {
        if label.is_empty() {
            return Err(IssuerNameError::EmptyLabel(name.to_string()));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(IssuerNameError::LabelTooLong {
                label: label.to_string(),
                len: label.len(),
            });
        }
        if !is_ldh_label(label) {
            return Err(IssuerNameError::InvalidLabel(label.to_string()));
        }
    }

    // Strict IDNA processing must leave the name unchanged
    match idna::domain_to_ascii_strict(name) {
        Ok(canonical) if canonical == name => Ok(()),
        _ => Err(IssuerNameError::NonCanonical {
            name: name.to_string(),
        }),
    }
}

/// Normalize an operator-supplied issuer-domain-name and validate the result.
pub fn normalize_user_supplied(name: &str) -> Result<String, IssuerNameError> {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    let lowered = trimmed.to_lowercase();
    if lowered.is_empty() {
        return Err(IssuerNameError::Empty);
    }

    let ascii = idna::domain_to_ascii(&lowered).map_err(|e| IssuerNameError::Idna {
        name: lowered.clone(),
        reason: e.to_string(),
    })?;
    validate(&ascii)?;
    Ok(ascii)
}

fn is_ldh_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}
