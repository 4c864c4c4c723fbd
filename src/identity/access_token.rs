//! HS256 access tokens (JWT).
//!
//! Tokens are stateless: validity here only means signature, issuer and
//! expiry check out. Revocation is the token version guard's job.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use super::model::{DecodedAccessClaims, User};
use super::store::Clock;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct AccessTokenClaims {
    iss: String,
    sub: String,
    usr: String,
    #[serde(default)]
    eml: Option<String>,
    ver: i64,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AccessTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenCodec")
            .field("secret", &"***")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl AccessTokenCodec {
    pub fn new(secret: SecretString, issuer: String, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;
        // `exp` is compared against the injected clock in `decode`.
        validation.validate_exp = false;

        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation,
            issuer,
            ttl,
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `user` expiring `ttl` from now.
    ///
    /// # Errors
    /// `TokenCreation` if encoding or signing fails.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = self.clock.now();
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: user.id.to_string(),
            usr: user.username.clone(),
            eml: user.email.clone(),
            ver: user.token_version,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|err| AuthError::TokenCreation(err.into()))
    }

    /// Verify and decode a token, all or nothing.
    ///
    /// # Errors
    /// - `MalformedToken` when the token or its claims cannot be parsed,
    /// - `InvalidToken` on an unexpected algorithm, bad signature or foreign issuer,
    /// - `TokenExpired` once `exp` is reached.
    pub fn decode(&self, token: &str) -> Result<DecodedAccessClaims, AuthError> {
        let data = decode::<AccessTokenClaims>(token.trim(), &self.decoding_key, &self.validation)
            .map_err(|err| rejection(err.kind()))?;
        let claims = data.claims;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::MalformedToken)?;
        if claims.ver < 0 || claims.usr.is_empty() {
            return Err(AuthError::MalformedToken);
        }
        let expires_at =
            DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(AuthError::MalformedToken)?;
        if expires_at <= self.clock.now() {
            return Err(AuthError::TokenExpired);
        }

        Ok(DecodedAccessClaims {
            user_id,
            token_version: claims.ver,
            username: claims.usr,
            email: claims.eml,
            expires_at,
        })
    }
}

fn rejection(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::MissingAlgorithm
        | ErrorKind::ImmatureSignature => AuthError::InvalidToken,
        // Structure, encoding, JSON and missing claims.
        _ => AuthError::MalformedToken,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::store::FixedClock;
    use base64ct::{Base64UrlUnpadded, Encoding};
    use chrono::TimeZone;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_700_000_000;

    fn clock() -> Arc<FixedClock> {
        let start = Utc.timestamp_opt(NOW, 0).single().unwrap_or_else(Utc::now);
        Arc::new(FixedClock::new(start))
    }

    fn codec(clock: Arc<FixedClock>) -> AccessTokenCodec {
        AccessTokenCodec::new(
            SecretString::from(SECRET),
            "quire".to_string(),
            Duration::minutes(15),
            clock,
        )
    }

    fn user(email: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::now_v7(),
            username: "alice".to_string(),
            email: email.map(str::to_string),
            password_hash: None,
            name: "Alice".to_string(),
            token_version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode_raw(algorithm: Algorithm, claims: &serde_json::Value, key: &str) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .unwrap()
    }

    fn b64_json(value: &serde_json::Value) -> String {
        Base64UrlUnpadded::encode_string(value.to_string().as_bytes())
    }

    #[test]
    fn issue_and_decode() -> Result<(), AuthError> {
        let codec = codec(clock());
        let user = user(Some("alice@x.com"));
        let token = codec.issue(&user)?;
        let claims = codec.decode(&token)?;
        assert_eq!(claims.user_id, user.id);
        assert_eq!(claims.token_version, 3);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email.as_deref(), Some("alice@x.com"));
        assert_eq!(claims.expires_at.timestamp(), NOW + 15 * 60);
        Ok(())
    }

    #[test]
    fn oauth_only_user_has_no_email_claim() -> Result<(), AuthError> {
        let codec = codec(clock());
        let token = codec.issue(&user(None))?;
        assert_eq!(codec.decode(&token)?.email, None);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<(), AuthError> {
        let clock = clock();
        let codec = codec(clock.clone());
        let token = codec.issue(&user(None))?;
        clock.advance(Duration::minutes(15));
        assert!(matches!(codec.decode(&token), Err(AuthError::TokenExpired)));
        Ok(())
    }

    #[test]
    fn foreign_secret_or_issuer_is_invalid() -> Result<(), AuthError> {
        let clock = clock();
        let token = codec(clock.clone()).issue(&user(None))?;

        let other_secret = AccessTokenCodec::new(
            SecretString::from("another-secret-another-secret-xx"),
            "quire".to_string(),
            Duration::minutes(15),
            clock.clone(),
        );
        assert!(matches!(
            other_secret.decode(&token),
            Err(AuthError::InvalidToken)
        ));

        let other_issuer = AccessTokenCodec::new(
            SecretString::from(SECRET),
            "elsewhere".to_string(),
            Duration::minutes(15),
            clock,
        );
        assert!(matches!(
            other_issuer.decode(&token),
            Err(AuthError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn tampered_payload_is_invalid() -> Result<(), AuthError> {
        let codec = codec(clock());
        let token = codec.issue(&user(None))?;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = b64_json(&serde_json::json!({
            "iss": "quire", "sub": Uuid::now_v7().to_string(), "usr": "mallory",
            "ver": 0, "iat": NOW, "exp": NOW + 900
        }));
        parts[1] = &forged;
        assert!(matches!(
            codec.decode(&parts.join(".")),
            Err(AuthError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec(clock());
        assert!(matches!(codec.decode(""), Err(AuthError::MalformedToken)));
        assert!(matches!(
            codec.decode("not-a-token"),
            Err(AuthError::MalformedToken)
        ));
        assert!(matches!(
            codec.decode("a.b.c.d"),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn missing_or_mistyped_claims_are_malformed() {
        let codec = codec(clock());
        let missing_version = encode_raw(
            Algorithm::HS256,
            &serde_json::json!({
                "iss": "quire", "sub": Uuid::now_v7().to_string(), "usr": "alice",
                "iat": NOW, "exp": NOW + 900
            }),
            SECRET,
        );
        assert!(matches!(
            codec.decode(&missing_version),
            Err(AuthError::MalformedToken)
        ));

        let bad_subject = encode_raw(
            Algorithm::HS256,
            &serde_json::json!({
                "iss": "quire", "sub": "not-a-uuid", "usr": "alice",
                "ver": 0, "iat": NOW, "exp": NOW + 900
            }),
            SECRET,
        );
        assert!(matches!(
            codec.decode(&bad_subject),
            Err(AuthError::MalformedToken)
        ));

        let string_version = encode_raw(
            Algorithm::HS256,
            &serde_json::json!({
                "iss": "quire", "sub": Uuid::now_v7().to_string(), "usr": "alice",
                "ver": "0", "iat": NOW, "exp": NOW + 900
            }),
            SECRET,
        );
        assert!(matches!(
            codec.decode(&string_version),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn other_algorithms_are_invalid() {
        let codec = codec(clock());
        let claims = serde_json::json!({
            "iss": "quire", "sub": Uuid::now_v7().to_string(), "usr": "alice",
            "ver": 0, "iat": NOW, "exp": NOW + 900
        });

        let hs384 = encode_raw(Algorithm::HS384, &claims, SECRET);
        assert!(matches!(codec.decode(&hs384), Err(AuthError::InvalidToken)));

        let unsigned = format!(
            "{}.{}.",
            b64_json(&serde_json::json!({"alg": "none", "typ": "JWT"})),
            b64_json(&claims)
        );
        assert!(codec.decode(&unsigned).is_err());
    }

    #[test]
    fn missing_expiry_is_malformed() {
        let codec = codec(clock());
        let token = encode_raw(
            Algorithm::HS256,
            &serde_json::json!({
                "iss": "quire", "sub": Uuid::now_v7().to_string(), "usr": "alice",
                "ver": 0, "iat": NOW
            }),
            SECRET,
        );
        assert!(matches!(codec.decode(&token), Err(AuthError::MalformedToken)));
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", codec(clock()));
        assert!(!rendered.contains(SECRET));
    }
}
