//! Session credential transport: `Authorization: Bearer <credential>`.

use axum::http::{header::AUTHORIZATION, HeaderMap};


/// Extracts the session credential from the `Authorization` header.
///
/// The scheme is matched case-insensitively; surrounding whitespace around the
/// credential is ignored.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let header_value = headers
        .get(AUTHORIZATION)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(header_value)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let (scheme, credential) = header_value
        .split_once(' ')
        .ok_or(TokenError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    let credential = credential.trim();
    if credential.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(credential.to_string())
}

/// Credential transport errors. All of them reject the request as unauthenticated.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TokenError {
    /// No `Authorization` header
    Missing,
    /// Not `Bearer <credential>`, or not valid header text
    InvalidFormat,
    /// Scheme present, credential blank
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization header not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization header format"),
            TokenError::Empty => write!(f, "Session credential is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
