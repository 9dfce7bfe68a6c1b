//! Bearer-token authentication for the WebSocket upgrade.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::ExposeSecret;
use serde::Deserialize;

use abrigo_core::identity::{AuthError, IdentityVerifier, VerifiedIdentity};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Verifies HS256 tokens signed with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &secrecy::SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(VerifiedIdentity {
            subject: data.claims.sub,
            email: data.claims.email,
            email_verified: data.claims.email_verified,
        })
    }
}

/// Token from `Authorization: Bearer`, falling back to the `token` query
/// parameter for clients that cannot set headers on a WebSocket upgrade.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    bearer
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &str = "test-jwt-secret";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        email: Option<&'a str>,
        email_verified: bool,
        exp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iss: Option<&'a str>,
    }

    fn token(sub: &str, exp_offset_secs: i64, secret: &str, iss: Option<&str>) -> String {
        let claims = TestClaims {
            sub,
            email: Some("pessoa@example.com"),
            email_verified: true,
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            iss,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(&secrecy::SecretString::from(SECRET))
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let identity = verifier().verify(&token("uid-1", 3600, SECRET, None)).await.unwrap();
        assert_eq!(identity.subject, "uid-1");
        assert_eq!(identity.email.as_deref(), Some("pessoa@example.com"));
        assert!(identity.email_verified);
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let err = verifier().verify(&token("uid-1", -3600, SECRET, None)).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let err = verifier().verify(&token("uid-1", 3600, "other", None)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn blank_token_is_missing() {
        assert!(matches!(verifier().verify("  ").await, Err(AuthError::MissingToken)));
        assert!(matches!(verifier().verify("not.a.jwt").await, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn issuer_enforced_when_configured() {
        let strict = verifier().with_issuer("abrigo-auth");
        assert!(strict.verify(&token("uid-1", 3600, SECRET, Some("abrigo-auth"))).await.is_ok());
        assert!(strict.verify(&token("uid-1", 3600, SECRET, Some("elsewhere"))).await.is_err());
    }

    #[test]
    fn bearer_header_preferred_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_token(&headers, Some("xyz")).as_deref(), Some("abc"));
        assert_eq!(extract_token(&HeaderMap::new(), Some("xyz")).as_deref(), Some("xyz"));
        assert_eq!(extract_token(&HeaderMap::new(), Some("")), None);
        assert_eq!(extract_token(&HeaderMap::new(), None), None);
    }
}
