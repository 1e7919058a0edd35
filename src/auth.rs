// src/auth.rs
use crate::db::Database;
use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::{Filter, Rejection};

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: usize,
}

/// Password hashing and signed session tokens.
pub struct Authenticator {
    secret: String,
    ttl: Duration,
    bcrypt_cost: u32,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>, ttl: Duration, bcrypt_cost: u32) -> Self {
        Authenticator {
            secret: secret.into(),
            ttl,
            bcrypt_cost,
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        Ok(bcrypt::hash(password, self.bcrypt_cost)?)
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub fn issue_token(&self, user_id: i64) -> Result<String> {
        let claims = Claims {
            sub: user_id,
            exp: (Utc::now() + self.ttl).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<i64> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims.sub)
    }

    pub fn session_cookie(&self, user_id: i64) -> Result<String> {
        Ok(format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            self.issue_token(user_id)?,
            self.ttl.num_seconds()
        ))
    }
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Extracts the logged-in user id, rejecting with `LoginRequired` otherwise.
/// A valid token naming a user that no longer exists counts as logged out.
pub fn require_user(
    auth: Arc<Authenticator>,
    db: Database,
) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let auth = auth.clone();
        let db = db.clone();
        async move {
            current_user(&auth, &db, token)
                .await
                .map_err(warp::reject::custom)
        }
    })
}

async fn current_user(auth: &Authenticator, db: &Database, token: Option<String>) -> Result<i64> {
    let user_id = token
        .and_then(|t| auth.verify_token(&t).ok())
        .ok_or(AppError::LoginRequired)?;
    match db.get_user(user_id).await? {
        Some(user) => Ok(user.id),
        None => Err(AppError::LoginRequired),
    }
}

pub fn with_auth(
    auth: Arc<Authenticator>,
) -> impl Filter<Extract = (Arc<Authenticator>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || auth.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new("test-secret", Duration::hours(1), 4)
    }

    #[test]
    fn password_round_trip() {
        let auth = authenticator();
        let hash = auth.hash_password("hunter2").unwrap();
        assert!(auth.verify_password("hunter2", &hash));
        assert!(!auth.verify_password("hunter3", &hash));
        assert!(!auth.verify_password("hunter2", "not-a-bcrypt-hash"));
    }

    #[test]
    fn token_carries_user_id() {
        let auth = authenticator();
        let token = auth.issue_token(7).unwrap();
        assert_eq!(auth.verify_token(&token).unwrap(), 7);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = Authenticator::new("other", Duration::hours(1), 4)
            .issue_token(7)
            .unwrap();
        assert!(authenticator().verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = Authenticator::new("test-secret", Duration::hours(-2), 4);
        let token = auth.issue_token(7).unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[tokio::test]
    async fn token_for_missing_user_is_not_a_session() {
        let auth = authenticator();
        let db = Database::new_in_memory().await.unwrap();
        let token = auth.issue_token(42).unwrap();
        let err = current_user(&auth, &db, Some(token)).await.unwrap_err();
        assert!(matches!(err, AppError::LoginRequired));

        let id = db
            .create_user("alice", "hash", rust_decimal::Decimal::new(100, 0))
            .await
            .unwrap();
        let token = auth.issue_token(id).unwrap();
        assert_eq!(current_user(&auth, &db, Some(token)).await.unwrap(), id);
        assert!(current_user(&auth, &db, None).await.is_err());
    }

    #[test]
    fn session_cookie_is_http_only() {
        let cookie = authenticator().session_cookie(3).unwrap();
        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
