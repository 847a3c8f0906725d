//! Access-token issuance and validation, password hashing, and the bearer
//! middleware.
//!
//! The lifecycle core only ever consumes the validated `(user_id, role)`
//! identity this module produces. Access tokens are HS256 JWTs; refresh and
//! download tokens are opaque 256-bit URL-safe random values, refresh tokens
//! stored as SHA-256 digests.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ApiError, codes};
use crate::state::SharedState;

const ISSUER: &str = "torva";

/// Validated caller identity carried through request extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Account identifier.
    pub user_id: Uuid,
    /// Login email.
    pub email: String,
    /// Role: `user`, `premium`, `demo`, or `admin`.
    pub role: String,
}

impl Identity {
    /// Whether the caller holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    role: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// Token verification failures, separated so expiry can surface its stable
/// code to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Signature valid but past expiry.
    Expired,
    /// Anything else.
    Invalid,
}

/// Issues and validates tokens, hashes credentials.
#[derive(Clone)]
pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_expiry_minutes: i64,
    refresh_expiry_days: i64,
}

impl AuthService {
    /// Build the service around an HMAC secret and expiry windows.
    #[must_use]
    pub fn new(secret: &str, access_expiry_minutes: i64, refresh_expiry_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_expiry_minutes,
            refresh_expiry_days,
        }
    }

    /// Access-token lifetime in seconds, for client `expires_in` fields.
    #[must_use]
    pub const fn access_expiry_secs(&self) -> i64 {
        self.access_expiry_minutes * 60
    }

    /// Refresh-token validity deadline from now.
    #[must_use]
    pub fn refresh_deadline(&self) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::days(self.refresh_expiry_days)
    }

    /// Issue a signed access token for an identity.
    ///
    /// # Errors
    ///
    /// Fails when signing fails.
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: &str,
    ) -> anyhow::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.access_expiry_minutes)).timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Validate an access token and recover the identity.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Expired`] past expiry, [`TokenError::Invalid`]
    /// for everything else.
    pub fn verify_access_token(&self, token: &str) -> Result<Identity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?;
        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::Invalid)?;
        Ok(Identity {
            user_id,
            email: data.claims.email,
            role: data.claims.role,
        })
    }
}

/// Opaque 256-bit URL-safe random token.
#[must_use]
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest used to store refresh tokens.
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Argon2id hash of a password.
///
/// # Errors
///
/// Fails when hashing fails.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    use argon2::password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2::Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("password hashing failed: {err}"))?;
    Ok(hash.to_string())
}

/// Constant-time verification of a password against its stored hash.
#[must_use]
pub fn verify_password(password: &str, encoded_hash: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};

    PasswordHash::new(encoded_hash)
        .map(|parsed| {
            argon2::Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Minimum password policy: eight characters with upper, lower, and digit.
///
/// # Errors
///
/// Returns a user-facing message describing the unmet requirement.
pub fn validate_password_strength(password: &str) -> Result<(), &'static str> {
    if password.len() < 8 {
        return Err("password must be at least 8 characters long");
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err("password must contain uppercase, lowercase, and numbers")
    }
}

/// Pull a bearer token out of an `Authorization` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

fn identity_error(err: TokenError) -> ApiError {
    match err {
        TokenError::Expired => {
            ApiError::unauthorized("token expired").with_code(codes::TOKEN_EXPIRED)
        }
        TokenError::Invalid => ApiError::unauthorized("invalid token"),
    }
}

/// Validate a raw token string into an identity, mapping failures to the
/// wire error shape.
///
/// # Errors
///
/// Returns 401, with `TOKEN_EXPIRED` set for expired signatures.
pub fn identity_from_token(state: &SharedState, token: &str) -> Result<Identity, ApiError> {
    state.auth.verify_access_token(token).map_err(identity_error)
}

/// Bearer middleware: validates `Authorization` and stores the [`Identity`]
/// in request extensions.
///
/// # Errors
///
/// Returns 401 when the header is missing, malformed, or carries an invalid
/// or expired token.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;
    let token = bearer_token(header)
        .ok_or_else(|| ApiError::unauthorized("invalid authorization header format"))?;
    let identity = identity_from_token(&state, token)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Admin middleware; must run inside [`require_auth`].
///
/// # Errors
///
/// Returns 403 when the caller is not an admin.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = request
        .extensions()
        .get::<Identity>()
        .is_some_and(Identity::is_admin);
    if !is_admin {
        return Err(ApiError::forbidden("admin access required"));
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("test-secret", 15, 7)
    }

    #[test]
    fn access_token_round_trips() {
        let auth = service();
        let user_id = Uuid::new_v4();
        let token = auth
            .issue_access_token(user_id, "user@example.com", "premium")
            .expect("issue token");
        let identity = auth.verify_access_token(&token).expect("verify token");
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.email, "user@example.com");
        assert_eq!(identity.role, "premium");
        assert!(!identity.is_admin());
    }

    #[test]
    fn expired_token_reports_expiry() {
        let auth = AuthService::new("test-secret", -5, 7);
        let token = auth
            .issue_access_token(Uuid::new_v4(), "a@b.c", "user")
            .expect("issue token");
        assert_eq!(service().verify_access_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_token_is_invalid() {
        let auth = service();
        let token = auth
            .issue_access_token(Uuid::new_v4(), "a@b.c", "user")
            .expect("issue token");
        let other = AuthService::new("other-secret", 15, 7);
        assert_eq!(other.verify_access_token(&token), Err(TokenError::Invalid));
        assert_eq!(auth.verify_access_token("garbage"), Err(TokenError::Invalid));
    }

    #[test]
    fn opaque_tokens_are_unique_and_url_safe() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a, b);
        assert!(a.len() >= 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn refresh_token_digest_is_stable_hex() {
        let digest = hash_refresh_token("token-value");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_refresh_token("token-value"));
        assert_ne!(digest, hash_refresh_token("other-value"));
    }

    #[test]
    fn password_round_trip_and_strength() {
        assert!(validate_password_strength("Str0ngpass").is_ok());
        assert!(validate_password_strength("short1A").is_err());
        assert!(validate_password_strength("alllowercase1").is_err());

        let hash = hash_password("Str0ngpass").expect("hash");
        assert!(verify_password("Str0ngpass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("Str0ngpass", "not-a-hash"));
    }

    #[test]
    fn bearer_parsing_is_case_insensitive() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
