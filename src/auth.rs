use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::{AppError, Result},
    models::UserId,
    store::Store,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub username: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String, // session id, looked up in the session cache
}

impl Claims {
    pub fn verify(token: &str, jwt_secret: &str) -> Result<Self> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_ref()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }

    pub fn user_id(&self) -> Result<UserId> {
        self.sub
            .parse()
            .map_err(|_| AppError::Authentication("Invalid user ID in token".to_string()))
    }
}

/// The acting user, resolved from a bearer token whose session is still live.
#[derive(Debug)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl<S: Store> FromRequestParts<AppState<S>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Unauthenticated)?;

        let claims = Claims::verify(bearer.token(), &state.config.jwt_secret)?;

        match state.sessions.get_session(&claims.jti).await? {
            Some(stored_user_id) if stored_user_id == claims.sub => {}
            Some(_) => return Err(AppError::Authentication("Invalid session".to_string())),
            None => return Err(AppError::Authentication("Session expired".to_string())),
        }

        Ok(AuthUser {
            user_id: claims.user_id()?,
        })
    }
}

// Optional auth user (for endpoints that work with or without auth)
#[derive(Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl OptionalAuthUser {
    pub fn user_id(&self) -> Option<UserId> {
        self.0.as_ref().map(|user| user.user_id)
    }
}

impl<S: Store> FromRequestParts<AppState<S>> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalAuthUser(Some(user))),
            // A broken session store is not the same as an anonymous caller.
            Err(AppError::Redis(e)) => Err(AppError::Redis(e)),
            Err(_) => Ok(OptionalAuthUser(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    const SECRET: &str = "keyboard cat";

    impl Claims {
        fn new(
            user_id: UserId,
            username: String,
            jwt_secret: &str,
            ttl: Duration,
        ) -> Result<(String, Self)> {
            let now = Utc::now();
            let claims = Self {
                sub: user_id.to_string(),
                username,
                exp: (now + ttl).timestamp(),
                iat: now.timestamp(),
                jti: Uuid::new_v4().to_string(),
            };

            let token = encode(
                &Header::default(),
                &claims,
                &EncodingKey::from_secret(jwt_secret.as_ref()),
            )?;

            Ok((token, claims))
        }
    }

    #[test]
    fn test_token_verifies_with_issuing_secret() {
        let (token, issued) = Claims::new(7, "ben".to_string(), SECRET, Duration::hours(1)).unwrap();

        let claims = Claims::verify(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), 7);
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn test_token_rejected_with_other_secret() {
        let (token, _) = Claims::new(7, "ben".to_string(), SECRET, Duration::hours(1)).unwrap();
        assert!(matches!(
            Claims::verify(&token, "another secret"),
            Err(AppError::Jwt(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let (token, _) =
            Claims::new(7, "ben".to_string(), SECRET, Duration::hours(-2)).unwrap();
        assert!(Claims::verify(&token, SECRET).is_err());
    }
}
