use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` whose rejections come back as `AppError::Validation`, so a
/// bad body gets the same JSON error shape as every other failure.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
