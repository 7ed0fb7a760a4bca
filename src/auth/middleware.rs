use crate::{
    auth::{
        session::{Session, SessionId, SessionRecord},
        users::{UserId, UserStore},
    },
    settings, AppState,
};
use axum::{
    extract::{Request, State},
    http::{
        header::{self, HeaderValue, InvalidHeaderValue},
        Request as HttpRequest,
    },
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;

/// Authentication flags of the current request.
///
/// Recomputed on every request from the session and the live user record,
/// never stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    /// The session belongs to an existing user who logged in.
    pub is_auth: bool,
    /// That user currently has the admin flag.
    pub is_admin: bool,
}

impl AuthState {
    /// No user.
    pub fn anonymous() -> AuthState {
        AuthState::default()
    }
}

/// Create a HashMap with the content of the cookie headers.
fn get_cookie_map<B>(req: &HttpRequest<B>) -> HashMap<String, String> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|cookie_str| cookie_str.split(';'))
        .filter_map(|cookie_pair| {
            let (name, value) = cookie_pair.trim().split_once('=')?;
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Derive the auth flags of a session.
///
/// The admin flag comes from the stored user, not from the session snapshot,
/// so a revoked admin loses access on the next request. Every failure gives
/// an anonymous state.
pub async fn resolve(record: &SessionRecord, users: &dyn UserStore) -> AuthState {
    let user = match (&record.user, record.is_authenticated) {
        (Some(user), true) => user,
        _ => return AuthState::anonymous(),
    };

    let user_id: UserId = match user.id.parse() {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!("invalid user id format in session: {}", err);
            return AuthState::anonymous();
        }
    };

    match users.find_by_id(user_id).await {
        Ok(Some(user_doc)) => AuthState {
            is_auth: true,
            is_admin: user_doc.is_admin,
        },
        Ok(None) => {
            tracing::warn!("user {} of the session not found in the database", user_id);
            AuthState::anonymous()
        }
        Err(err) => {
            tracing::error!("error fetching user {}: {}", user_id, err);
            AuthState::anonymous()
        }
    }
}

/// Loads the session of the request and resolves its auth flags. Both are
/// inserted in the request extensions for the handlers.
pub async fn auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let cookies = get_cookie_map(&req);
    let cookie = cookies.get(&state.cookie.cookie_name).map(String::as_str);

    let session = match Session::load(state.sessions.as_ref(), cookie).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!("could not load session: {}", err);
            Session::default()
        }
    };
    let auth_state = resolve(&session.record, state.users.as_ref()).await;
    tracing::debug!(
        is_auth = auth_state.is_auth,
        is_admin = auth_state.is_admin,
        "resolved request auth"
    );

    req.extensions_mut().insert(session);
    req.extensions_mut().insert(auth_state);
    next.run(req).await
}

/// `Set-Cookie` value handing a new session id to the client.
pub fn session_cookie(
    config: &settings::Session,
    id: &SessionId,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut value = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        config.cookie_name,
        id.as_str()
    );
    if config.secure {
        value.push_str("; Secure");
    }
    if let Some(max_age) = config.max_age_secs {
        value.push_str(&format!("; Max-Age={}", max_age));
    }
    HeaderValue::from_str(&value)
}

/// `Set-Cookie` value removing the session cookie.
pub fn clear_session_cookie(config: &settings::Session) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut value = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        config.cookie_name
    );
    if config.secure {
        value.push_str("; Secure");
    }
    HeaderValue::from_str(&value)
}
