#![deny(missing_docs)]

//! This crate contains the server for the session based authentication demo:
//! signup, login, logout and the role gated admin and profile pages.

/// Module containing all the authentication, registration, cookies, etc. logic.
pub mod auth;
/// Errors that end a request with the generic 500 page.
pub mod error;
/// This module is used to parse and read from configuration files for the
/// server.
pub mod settings;
mod app;
mod manage_users;
mod pages;

pub use app::{app, run_server, AppState, ServerError};
pub use auth::AuthState;
pub use error::AppError;
pub use manage_users::{create_admin, set_admin, ManageError};

use askama::Template;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Response;

struct HtmlTemplate<T>(T);

impl<T> IntoResponse for HtmlTemplate<T>
where
    T: Template,
{
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template. Error: {}", err),
            )
                .into_response(),
        }
    }
}
