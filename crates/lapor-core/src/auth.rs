//! Bearer-token identity for the HTTP surfaces.
//!
//! Tokens are HS256-signed and carry `{sub, role, agency}`; the services
//! treat the verified claims as an opaque identity. The signing secret
//! comes from `LAPOR_JWT_SECRET`; a baked-in demo value is used as a
//! fallback so the stack runs out of the box, with a warning at startup.
//!
//! The login roster is a fixed demo set (three citizens, one officer per
//! agency). Swapping it for a real credential store only touches
//! [`authenticate`].

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{AGENCY_HEALTH, AGENCY_INFRA, AGENCY_SAFETY};
use crate::error::ServiceError;

/// Environment variable holding the signing secret.
pub const SECRET_ENV: &str = "LAPOR_JWT_SECRET";

/// Fallback secret for demo deployments only.
const DEMO_SECRET: &str = "lapor-demo-secret-not-for-production-0000";

/// Token lifetime in seconds (24 hours).
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// The caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "citizen")]
    Citizen,
    #[serde(rename = "officer")]
    Officer,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Officer => "officer",
        }
    }
}

/// Verified token claims. `agency` is empty for citizens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    #[serde(default)]
    pub agency: String,
    pub iat: i64,
    pub exp: i64,
}

/// A demo roster entry.
#[derive(Debug, Clone)]
pub struct DemoUser {
    pub id: &'static str,
    password: &'static str,
    pub role: Role,
    pub agency: &'static str,
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser { id: "citizen1", password: "password", role: Role::Citizen, agency: "" },
    DemoUser { id: "citizen2", password: "password", role: Role::Citizen, agency: "" },
    DemoUser { id: "citizen3", password: "password", role: Role::Citizen, agency: "" },
    DemoUser { id: "officer1", password: "password", role: Role::Officer, agency: AGENCY_INFRA },
    DemoUser { id: "officer2", password: "password", role: Role::Officer, agency: AGENCY_HEALTH },
    DemoUser { id: "officer3", password: "password", role: Role::Officer, agency: AGENCY_SAFETY },
];

/// Checks demo credentials.
///
/// # Errors
///
/// Returns `ServiceError::Authentication` when the username is unknown or
/// the password does not match.
pub fn authenticate(username: &str, password: &str) -> Result<&'static DemoUser, ServiceError> {
    DEMO_USERS
        .iter()
        .find(|u| u.id == username && u.password == password)
        .ok_or_else(|| ServiceError::Authentication("invalid credentials".into()))
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
}

impl TokenService {
    /// Creates a token service with an explicit secret.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for an empty secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, ServiceError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ServiceError::Validation("token secret must not be empty".into()));
        }
        Ok(Self { secret })
    }

    /// Creates a token service from the environment, falling back to the
    /// demo secret with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => Self { secret },
            _ => {
                warn!(
                    "{SECRET_ENV} is not set; using the built-in demo secret. \
                     Do not deploy like this."
                );
                Self { secret: DEMO_SECRET.to_string() }
            }
        }
    }

    /// Issues a token for a roster user.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authentication` if signing fails.
    pub fn issue(&self, user: &DemoUser) -> Result<String, ServiceError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            agency: user.agency.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ServiceError::Authentication(format!("failed to sign token: {e}")))
    }

    /// Verifies a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Authentication` for expired, malformed, or
    /// wrongly-signed tokens.
    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| ServiceError::Authentication(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let service = TokenService::new("test-secret").unwrap();
        let user = authenticate("officer1", "password").unwrap();

        let token = service.issue(user).unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.sub, "officer1");
        assert_eq!(claims.role, Role::Officer);
        assert_eq!(claims.agency, AGENCY_INFRA);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = TokenService::new("secret-a").unwrap();
        let verifier = TokenService::new("secret-b").unwrap();

        let token = issuer.issue(authenticate("citizen1", "password").unwrap()).unwrap();
        assert!(matches!(
            verifier.verify(&token),
            Err(ServiceError::Authentication(_))
        ));
    }

    #[test]
    fn bad_credentials_are_rejected() {
        assert!(authenticate("citizen1", "wrong").is_err());
        assert!(authenticate("nobody", "password").is_err());
        assert!(authenticate("citizen2", "password").is_ok());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenService::new("").is_err());
    }
}
