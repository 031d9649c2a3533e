use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

// SQLSTATE codes that mean "another transaction got there first".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Rate limit exceeded")]
    RateLimit,
}

impl AppError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::StorageConflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                if matches!(
                    &*code,
                    SERIALIZATION_FAILURE | DEADLOCK_DETECTED | UNIQUE_VIOLATION
                ) {
                    return AppError::StorageConflict(db_err.message().to_string());
                }
            }
        }
        AppError::Database(err)
    }
}

/// True when a write referenced a row that does not exist.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| &*code == FOREIGN_KEY_VIOLATION),
        _ => false,
    }
}

// Malformed or mistyped request bodies share the validation error shape.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Migration(ref e) => {
                tracing::error!("Migration error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::StorageConflict(ref message) => {
                tracing::warn!("Storage conflict reached the client: {}", message);
                (StatusCode::CONFLICT, "Concurrent update, please retry")
            }
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.as_str()),
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, "not authenticated"),
            AppError::Authentication(ref message) => (StatusCode::UNAUTHORIZED, message.as_str()),
            AppError::Authorization(ref message) => (StatusCode::FORBIDDEN, message.as_str()),
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.as_str()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.as_str()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Jwt(ref e) => {
                tracing::debug!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, "Invalid token")
            }
            AppError::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

// Validation helper
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();
        error_messages.sort();

        AppError::Validation(error_messages.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AppError::NotFound("Post not found".into()), StatusCode::NOT_FOUND),
            (AppError::StorageConflict("x".into()), StatusCode::CONFLICT),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::RateLimit, StatusCode::TOO_MANY_REQUESTS),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn test_json_rejection_becomes_json_validation_error() {
        use axum::body::Body;
        use axum::extract::FromRequest;
        use axum::http::{Request, header};

        let request = Request::builder()
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"value": 0}"#))
            .unwrap();
        let rejection = Json::<crate::models::VoteRequest>::from_request(request, &())
            .await
            .unwrap_err();

        let err = AppError::from(rejection);
        assert!(matches!(err, AppError::Validation(_)));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[test]
    fn test_non_database_sqlx_errors_are_not_conflicts() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_conflict());
        assert!(matches!(err, AppError::Database(_)));
        assert!(!is_foreign_key_violation(&sqlx::Error::RowNotFound));
    }
}
