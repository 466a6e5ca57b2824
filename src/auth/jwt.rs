//! HS256 JSON Web Tokens.
//!
//! Signing and verification go through `jsonwebtoken`; any header algorithm
//! other than `HS256` is refused before the signature is checked.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode_header, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;
use crate::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub org_id: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Malformed)
    }
}

/// Signing and verification keys derived from [`AuthConfig`]
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: impl AsRef<[u8]>, access_ttl: Duration) -> Self {
        let secret = secret.as_ref();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.secret_key.as_bytes(),
            Duration::minutes(config.access_token_expire_minutes),
        )
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        org_id: Option<Uuid>,
    ) -> Result<String, TokenError> {
        self.issue(user_id, org_id, TokenKind::Access, Utc::now(), self.access_ttl)
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        org_id: Option<Uuid>,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id.to_string(),
            org_id: org_id.map(|id| id.to_string()),
            exp: (issued_at + ttl).timestamp(),
            iat: issued_at.timestamp(),
            kind,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify algorithm, signature and expiry, returning the claims.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let token = token.trim();
        let header = decode_header(token).map_err(token_error)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(token_error)
    }

    /// Decode an access token and return the subject's user id.
    pub fn verify_access(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::WrongType);
        }
        claims.user_id()
    }
}

fn token_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm("unknown".into()),
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new("test-secret", Duration::minutes(30))
    }

    #[test]
    fn issued_access_token_verifies() {
        let user = Uuid::new_v4();
        let token = keys().issue_access_token(user, Some(Uuid::new_v4())).unwrap();
        assert_eq!(keys().verify_access(&token).unwrap(), user);
    }

    #[test]
    fn claims_carry_organization_and_kind() {
        let (user, org) = (Uuid::new_v4(), Uuid::new_v4());
        let token = keys().issue_access_token(user, Some(org)).unwrap();
        let claims = keys().decode(&token).unwrap();
        assert_eq!(claims.org_id, Some(org.to_string()));
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn rejects_expired_token() {
        let issued = Utc::now() - Duration::hours(2);
        let token = keys()
            .issue(Uuid::new_v4(), None, TokenKind::Access, issued, Duration::minutes(30))
            .unwrap();
        assert_eq!(keys().verify_access(&token), Err(TokenError::Expired));
    }

    #[test]
    fn expiry_has_no_leeway() {
        let issued = Utc::now() - Duration::minutes(31);
        let token = keys()
            .issue(Uuid::new_v4(), None, TokenKind::Access, issued, Duration::minutes(30))
            .unwrap();
        assert_eq!(keys().verify_access(&token), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_foreign_signature() {
        let token = JwtKeys::new("other", Duration::minutes(5))
            .issue_access_token(Uuid::new_v4(), None)
            .unwrap();
        assert_eq!(keys().verify_access(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_refresh_token_for_access() {
        let token = keys()
            .issue(Uuid::new_v4(), None, TokenKind::Refresh, Utc::now(), Duration::days(7))
            .unwrap();
        assert_eq!(keys().verify_access(&token), Err(TokenError::WrongType));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(keys().verify_access("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(keys().verify_access("a.b.c.d"), Err(TokenError::Malformed));
    }

    #[test]
    fn rejects_other_hmac_algorithms() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            org_id: None,
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            iat: Utc::now().timestamp(),
            kind: TokenKind::Access,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(
            keys().verify_access(&token),
            Err(TokenError::UnsupportedAlgorithm("HS384".into()))
        );
    }

    #[test]
    fn rejects_unsigned_tokens() {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = b64.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = b64.encode(br#"{"sub":"x","exp":9999999999,"type":"access"}"#);
        let token = format!("{header}.{claims}.");
        assert!(keys().verify_access(&token).is_err());
    }

    #[test]
    fn rejects_token_without_subject() {
        #[derive(Serialize)]
        struct NoSubject {
            exp: i64,
            #[serde(rename = "type")]
            kind: TokenKind,
        }
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &NoSubject {
                exp: (Utc::now() + Duration::minutes(5)).timestamp(),
                kind: TokenKind::Access,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(keys().verify_access(&token), Err(TokenError::Malformed));
    }
}
