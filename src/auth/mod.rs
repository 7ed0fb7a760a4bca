//! Signup, login, logout, sessions and the per request auth resolution.

mod login;
mod middleware;
mod password;
mod register;
mod session;
mod users;

pub use login::{check_credentials, logout, serve_login, LogIn, CREDENTIALS_ERROR};
pub use middleware::{
    auth as auth_middleware, clear_session_cookie, resolve, session_cookie, AuthState,
};
pub use password::{PasswordError, PasswordHasher};
pub use register::{
    insert_user, serve_signup, validate_signup, SignUp, INVALID_INPUT_ERROR, USER_EXISTS_ERROR,
};
pub use session::{
    spawn_session_sweeper, InputData, MemorySessionStore, PgSessionStore, Session, SessionId,
    SessionRecord, SessionStore, SessionStoreError, SessionUser, DEFAULT_SESSION_TTL,
};
pub use users::{
    MalformedUserId, MemoryUserStore, NewUser, PgUserStore, User, UserId, UserStore,
    UserStoreError,
};

#[cfg(test)]
pub(crate) use password::cheap_hasher;

use crate::{AppError, AppState};
use axum::{
    http::header::{self, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};

const SESSION_ID_LEN: usize = 64;
const MIN_PASSWORD_LEN: usize = 6;

/// Persist the session and redirect, handing out the cookie if the session
/// was just created.
async fn save_and_redirect(
    state: &AppState,
    session: &mut Session,
    to: &str,
) -> Result<Response, AppError> {
    let is_new = session.save(state.sessions.as_ref()).await?;
    let mut response = Redirect::to(to).into_response();
    if let (true, Some(id)) = (is_new, session.id()) {
        response
            .headers_mut()
            .insert(header::SET_COOKIE, session_cookie(&state.cookie, id)?);
    }
    Ok(response)
}

/// Take the one-shot form data for a render. A session left with nothing
/// in it is destroyed rather than saved back, and the returned header clears
/// its cookie.
async fn consume_input_data(
    state: &AppState,
    session: &mut Session,
) -> Result<(InputData, Option<HeaderValue>), AppError> {
    let input = match session.take_input_data() {
        Some(input) => input,
        None => return Ok((InputData::default(), None)),
    };
    if session.record == SessionRecord::default() {
        session.destroy(state.sessions.as_ref()).await?;
        return Ok((input, Some(clear_session_cookie(&state.cookie)?)));
    }
    session.save(state.sessions.as_ref()).await?;
    Ok((input, None))
}
