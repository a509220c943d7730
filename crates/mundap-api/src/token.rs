use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use mundap_db::models::UserRow;
use mundap_types::api::{Claims, TokenPair};
use mundap_types::models::TokenKind;

use crate::error::{AppError, AppResult};

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and checks HS256 access and refresh tokens. The two kinds use
/// different secrets and carry their kind in the claims.
pub struct TokenIssuer {
    access: Keys,
    refresh: Keys,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(access_secret: &str, refresh_secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            access: Keys::new(access_secret),
            refresh: Keys::new(refresh_secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn issue(&self, user: &UserRow) -> AppResult<TokenPair> {
        let now = Utc::now();
        let access = self.sign(user, TokenKind::Access, now)?;
        let refresh = self.sign(user, TokenKind::Refresh, now)?;

        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Decodes `token`, checking signature, expiry and kind.
    pub fn verify(&self, kind: TokenKind, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(token, &self.keys(kind).decoding, &Validation::default())?;
        if data.claims.kind != kind {
            return Err(AppError::Unauthorized("Invalid token".to_string()));
        }
        Ok(data.claims)
    }

    fn sign(&self, user: &UserRow, kind: TokenKind, now: DateTime<Utc>) -> AppResult<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user.id,
            name: user.name.clone(),
            role: user.role,
            kind,
            jti: Uuid::new_v4(),
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.keys(kind).encoding)?)
    }

    fn keys(&self, kind: TokenKind) -> &Keys {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}

/// Expiry of a token as a timestamp, for the revocation list.
pub fn expires_at(claims: &Claims) -> DateTime<Utc> {
    DateTime::from_timestamp(claims.exp as i64, 0).unwrap_or_else(Utc::now)
}
