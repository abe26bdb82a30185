//! Session credentials: short-lived HS256 JWTs identifying a local user.
//!
//! Credentials are self-contained. Nothing is stored server-side, so a credential
//! stays valid until its `exp` passes; rotating the signing key invalidates every
//! outstanding credential at once.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Default credential lifetime in hours
pub const DEFAULT_SESSION_HOURS: i64 = 24;

/// Issuer stamped into every credential
pub const SESSION_ISSUER: &str = "calgate";

/// Shortest accepted signing secret, in bytes
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Symmetric signing secret. `Debug` is redacted.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Validates and wraps a signing secret. Startup-fatal on failure.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = secret.into();
        if bytes.len() < MIN_SIGNING_KEY_LEN {
            return Err(anyhow!(
                "Signing key must be at least {} bytes, got {}",
                MIN_SIGNING_KEY_LEN,
                bytes.len()
            ));
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Claims carried by a session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Local user id
    pub sub: String,
    /// Provider-issued external identity
    pub external_id: String,
    /// Workspace provisioned for the user at link time
    pub workspace_ref: String,
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl SessionClaims {
    pub fn local_user_id(&self) -> &str {
        &self.sub
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A freshly signed credential and its absolute expiry.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Session credential failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad signature, bad structure, wrong issuer, or expired
    InvalidCredential(String),
    /// Claims could not be signed
    Signing(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidCredential(msg) => write!(f, "Invalid credential: {}", msg),
            SessionError::Signing(msg) => write!(f, "Failed to sign credential: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Issues and validates session credentials with one symmetric key.
#[derive(Clone)]
pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl SessionSigner {
    pub fn new(key: &SigningKey) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(&key.0),
            decoding_key: DecodingKey::from_secret(&key.0),
            lifetime: Duration::hours(DEFAULT_SESSION_HOURS),
        }
    }

    /// Overrides the credential lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Signs a credential for the given identity triple.
    pub fn issue(
        &self,
        local_user_id: &str,
        external_id: &str,
        workspace_ref: &str,
    ) -> Result<IssuedSession, SessionError> {
        let now = Utc::now();
        let expires_at = now + self.lifetime;

        let claims = SessionClaims {
            sub: local_user_id.to_string(),
            external_id: external_id.to_string(),
            workspace_ref: workspace_ref.to_string(),
            iss: SESSION_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Signing(e.to_string()))?;

        Ok(IssuedSession {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Verifies signature, structure, issuer and expiry. Pure and stateless.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[SESSION_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "expired".to_string(),
                ErrorKind::InvalidSignature => "bad signature".to_string(),
                ErrorKind::InvalidIssuer => "untrusted issuer".to_string(),
                _ => format!("malformed: {}", e),
            };
            SessionError::InvalidCredential(reason)
        })?;

        let claims = data.claims;

        // jsonwebtoken treats exp == now as still valid; a credential is dead once its expiry is reached
        if claims.exp <= Utc::now().timestamp() {
            return Err(SessionError::InvalidCredential("expired".to_string()));
        }

        if claims.sub.is_empty() || claims.external_id.is_empty() {
            return Err(SessionError::InvalidCredential(
                "missing identity claims".to_string(),
            ));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> SessionSigner {
        SessionSigner::new(&SigningKey::new(vec![b'k'; 32]).unwrap())
    }

    #[test]
    fn test_signing_key_length_enforced() {
        assert!(SigningKey::new("short").is_err());
        assert!(SigningKey::new(vec![0u8; 32]).is_ok());
    }

    #[test]
    fn test_signing_key_debug_is_redacted() {
        let key = SigningKey::new(vec![b's'; 40]).unwrap();
        assert_eq!(format!("{:?}", key), "SigningKey(<redacted>)");
    }

    #[test]
    fn test_issue_then_validate_returns_same_identity() {
        let signer = signer();
        let issued = signer.issue("42", "ext-1", "ws-1").unwrap();

        let claims = signer.validate(&issued.token).unwrap();
        assert_eq!(claims.local_user_id(), "42");
        assert_eq!(claims.external_id, "ext-1");
        assert_eq!(claims.workspace_ref, "ws-1");
        assert_eq!(claims.iss, SESSION_ISSUER);
        assert_eq!(claims.expires_at(), issued.expires_at);
    }

    #[test]
    fn test_default_lifetime_is_24_hours() {
        let before = Utc::now();
        let issued = signer().issue("42", "ext-1", "ws-1").unwrap();

        let lifetime = issued.expires_at - before;
        assert!(lifetime <= Duration::hours(24));
        assert!(lifetime > Duration::hours(24) - Duration::seconds(5));
    }

    #[test]
    fn test_expired_credential_rejected() {
        let signer = signer().with_lifetime(Duration::seconds(-1));
        let issued = signer.issue("42", "ext-1", "ws-1").unwrap();

        assert_eq!(
            signer.validate(&issued.token),
            Err(SessionError::InvalidCredential("expired".to_string()))
        );
    }

    #[test]
    fn test_credential_dies_once_clock_passes_expiry() {
        let signer = signer().with_lifetime(Duration::seconds(1));
        let issued = signer.issue("42", "ext-1", "ws-1").unwrap();
        assert!(signer.validate(&issued.token).is_ok());

        std::thread::sleep(std::time::Duration::from_millis(2100));

        assert!(matches!(
            signer.validate(&issued.token),
            Err(SessionError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let issued = signer().issue("42", "ext-1", "ws-1").unwrap();
        let other = SessionSigner::new(&SigningKey::new(vec![b'x'; 32]).unwrap());

        assert_eq!(
            other.validate(&issued.token),
            Err(SessionError::InvalidCredential("bad signature".to_string()))
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = signer();
        let issued = signer.issue("42", "ext-1", "ws-1").unwrap();
        let forged = signer.issue("1", "ext-admin", "ws-1").unwrap();

        // Splice the forged payload onto the original signature
        let original: Vec<&str> = issued.token.split('.').collect();
        let other: Vec<&str> = forged.token.split('.').collect();
        let spliced = format!("{}.{}.{}", original[0], other[1], original[2]);

        assert!(matches!(
            signer.validate(&spliced),
            Err(SessionError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_malformed_credential_rejected() {
        let signer = signer();
        for token in ["", "not-a-jwt", "a.b.c", "a.b"] {
            assert!(
                matches!(signer.validate(token), Err(SessionError::InvalidCredential(_))),
                "token {:?} should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let key = SigningKey::new(vec![b'k'; 32]).unwrap();
        let claims = SessionClaims {
            sub: "42".to_string(),
            external_id: "ext-1".to_string(),
            workspace_ref: "ws-1".to_string(),
            iss: "someone-else".to_string(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&key.0),
        )
        .unwrap();

        assert_eq!(
            SessionSigner::new(&key).validate(&token),
            Err(SessionError::InvalidCredential("untrusted issuer".to_string()))
        );
    }
}
