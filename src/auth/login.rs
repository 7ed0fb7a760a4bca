use crate::{
    auth::{
        clear_session_cookie, consume_input_data, save_and_redirect,
        session::{InputData, Session, SessionUser},
        AuthState,
    },
    AppError, AppState, HtmlTemplate,
};
use askama::Template;
use axum::{
    extract::{rejection::FormRejection, Form, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    Extension,
};
use serde::Deserialize;

/// Shown for an unknown email and for a wrong password alike.
pub const CREDENTIALS_ERROR: &str = "Could not log you in, please check your credentials";

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    auth: AuthState,
    input: InputData,
}

/// The login form body.
#[derive(Deserialize, Debug, Default)]
pub struct LogIn {
    /// Email of the account.
    #[serde(default)]
    pub email: String,
    /// Plaintext password, compared as entered.
    #[serde(default)]
    pub password: String,
}

/// `GET /login`: renders the form, consuming the stashed input of a failed
/// attempt.
pub async fn serve_login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
    Extension(mut session): Extension<Session>,
) -> Result<Response, AppError> {
    let (input, clear_cookie) = consume_input_data(&state, &mut session).await?;
    let mut response = HtmlTemplate(LoginTemplate { auth, input }).into_response();
    if let Some(clear_cookie) = clear_cookie {
        response.headers_mut().insert(header::SET_COOKIE, clear_cookie);
    }
    Ok(response)
}

/// `POST /login`: checks the credentials and marks the session as
/// authenticated.
pub async fn check_credentials(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    log_in: Result<Form<LogIn>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(log_in) = log_in?;
    let existing_user = state.users.find_by_email(&log_in.email).await?;

    let user = match existing_user {
        Some(user) => {
            if state.hasher.verify(&log_in.password, &user.password_hash)? {
                Some(user)
            } else {
                tracing::debug!("wrong password for {}", log_in.email);
                None
            }
        }
        None => {
            tracing::debug!("login attempt for unknown email {}", log_in.email);
            None
        }
    };

    let user = match user {
        Some(user) => user,
        None => {
            session.record.input_data = Some(InputData::error(
                CREDENTIALS_ERROR,
                &log_in.email,
                None,
                &log_in.password,
            ));
            return save_and_redirect(&state, &mut session, "/login").await;
        }
    };

    session.record.user = Some(SessionUser {
        id: user.id.to_string(),
        email: user.email.clone(),
        is_admin: user.is_admin,
    });
    session.record.is_authenticated = true;
    tracing::info!("user {} logged in", user.id);

    let destination = if user.is_admin { "/admin" } else { "/profile" };
    save_and_redirect(&state, &mut session, destination).await
}

/// `POST /logout`: destroys the session and clears the cookie.
pub async fn logout(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
) -> Result<Response, AppError> {
    session.destroy(state.sessions.as_ref()).await?;
    let mut response = Redirect::to("/").into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie(&state.cookie)?);
    Ok(response)
}
