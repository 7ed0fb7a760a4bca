use crate::{
    auth::{
        consume_input_data, save_and_redirect,
        session::{InputData, Session},
        users::{NewUser, UserStoreError},
        AuthState, MIN_PASSWORD_LEN,
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

/// Shown when the signup form fails validation.
pub const INVALID_INPUT_ERROR: &str = "Invalid input - please check your data";
/// Shown when the email is already registered.
pub const USER_EXISTS_ERROR: &str = "User already exists";

#[derive(Template)]
#[template(path = "signup.html")]
struct SignupTemplate {
    auth: AuthState,
    input: InputData,
    confirm_email: String,
}

/// The signup form body. Missing fields are read as empty.
#[derive(Deserialize, Debug, Default)]
pub struct SignUp {
    /// Email of the new account.
    #[serde(default)]
    pub email: String,
    /// Must repeat `email` exactly.
    #[serde(default, rename = "confirm-email")]
    pub confirm_email: String,
    /// Plaintext password. Surrounding whitespace is dropped.
    #[serde(default)]
    pub password: String,
}

impl SignUp {
    /// Builds a signup outside of a form submission.
    pub fn new(email: &str, confirm_email: &str, password: &str) -> SignUp {
        SignUp {
            email: email.to_string(),
            confirm_email: confirm_email.to_string(),
            password: password.to_string(),
        }
    }

    /// The password as it gets hashed.
    pub fn password(&self) -> &str {
        self.password.trim()
    }
}

/// Whether a signup may create an account. Only checks for an `@` in the
/// email, nothing stricter.
pub fn validate_signup(sign_up: &SignUp) -> bool {
    let password = sign_up.password();
    !sign_up.email.is_empty()
        && !sign_up.confirm_email.is_empty()
        && !password.is_empty()
        && password.chars().count() >= MIN_PASSWORD_LEN
        && sign_up.email == sign_up.confirm_email
        && sign_up.email.contains('@')
}

fn rejected(sign_up: &SignUp, message: &str) -> InputData {
    InputData::error(
        message,
        &sign_up.email,
        Some(&sign_up.confirm_email),
        sign_up.password(),
    )
}

/// `GET /signup`: renders the form, consuming the stashed input of a failed
/// attempt.
pub async fn serve_signup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthState>,
    Extension(mut session): Extension<Session>,
) -> Result<Response, AppError> {
    let (input, clear_cookie) = consume_input_data(&state, &mut session).await?;
    let confirm_email = input.confirm_email.clone().unwrap_or_default();
    let mut response = HtmlTemplate(SignupTemplate {
        auth,
        input,
        confirm_email,
    })
    .into_response();
    if let Some(clear_cookie) = clear_cookie {
        response.headers_mut().insert(header::SET_COOKIE, clear_cookie);
    }
    Ok(response)
}

/// `POST /signup`: validates the form and creates a regular user.
pub async fn insert_user(
    State(state): State<AppState>,
    Extension(mut session): Extension<Session>,
    sign_up: Result<Form<SignUp>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(sign_up) = sign_up?;
    if !validate_signup(&sign_up) {
        tracing::debug!("invalid signup input");
        session.record.input_data = Some(rejected(&sign_up, INVALID_INPUT_ERROR));
        return save_and_redirect(&state, &mut session, "/signup").await;
    }

    if state.users.find_by_email(&sign_up.email).await?.is_some() {
        tracing::debug!("signup for existing user {}", sign_up.email);
        session.record.input_data = Some(rejected(&sign_up, USER_EXISTS_ERROR));
        return save_and_redirect(&state, &mut session, "/signup").await;
    }

    let password_hash = state.hasher.hash(sign_up.password())?;
    let new_user = NewUser {
        email: sign_up.email.clone(),
        password_hash,
        is_admin: false,
    };
    match state.users.insert(new_user).await {
        Ok(user_id) => {
            tracing::info!("created user {}", user_id);
            Ok(Redirect::to("/login").into_response())
        }
        // Lost a race with a concurrent signup for the same email.
        Err(UserStoreError::AlreadyExists) => {
            session.record.input_data = Some(rejected(&sign_up, USER_EXISTS_ERROR));
            save_and_redirect(&state, &mut session, "/signup").await
        }
        Err(e) => Err(e.into()),
    }
}
