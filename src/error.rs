use crate::auth::{PasswordError, SessionStoreError, UserStoreError};
use crate::{AuthState, HtmlTemplate};
use askama::Template;
use axum::extract::rejection::FormRejection;
use axum::http::{header::InvalidHeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::any::Any;
use thiserror::Error;

/// Every failure a handler cannot turn into a form error or a 401/403 page.
#[derive(Debug, Error)]
pub enum AppError {
    /// The credential store failed.
    #[error("user store error: {0}")]
    Store(#[from] UserStoreError),
    /// The session store failed.
    #[error("session store error: {0}")]
    Session(#[from] SessionStoreError),
    /// Hashing or parsing a stored hash failed.
    #[error("password hashing error: {0}")]
    Hash(#[from] PasswordError),
    /// The configured cookie name cannot go in a header.
    #[error("invalid cookie header: {0}")]
    Cookie(#[from] InvalidHeaderValue),
    /// The body of a form post could not be read.
    #[error("malformed form: {0}")]
    Form(#[from] FormRejection),
}

#[derive(Template)]
#[template(path = "500.html")]
struct InternalErrorTemplate {
    auth: AuthState,
}

/// The generic 500 page.
pub fn internal_error_page() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        HtmlTemplate(InternalErrorTemplate {
            auth: AuthState::anonymous(),
        }),
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("unhandled error: {}", self);
        internal_error_page()
    }
}

/// Used by the panic catching layer.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!("handler panicked: {}", details);
    internal_error_page()
}
