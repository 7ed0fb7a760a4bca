use crate::{AuthState, HtmlTemplate};
use askama::Template;
use axum::{http::StatusCode, response::IntoResponse, Extension};

#[derive(Template)]
#[template(path = "welcome.html")]
struct WelcomeTemplate {
    auth: AuthState,
}

#[derive(Template)]
#[template(path = "admin.html")]
struct AdminTemplate {
    auth: AuthState,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileTemplate {
    auth: AuthState,
}

#[derive(Template)]
#[template(path = "401.html")]
struct UnauthorizedTemplate {
    auth: AuthState,
}

#[derive(Template)]
#[template(path = "403.html")]
struct ForbiddenTemplate {
    auth: AuthState,
}

#[derive(Template)]
#[template(path = "404.html")]
struct NotFoundTemplate {
    auth: AuthState,
}

pub async fn welcome(Extension(auth): Extension<AuthState>) -> impl IntoResponse {
    HtmlTemplate(WelcomeTemplate { auth })
}

pub async fn admin(Extension(auth): Extension<AuthState>) -> impl IntoResponse {
    if !auth.is_auth {
        tracing::debug!("unauthorized request to the admin page");
        return (
            StatusCode::UNAUTHORIZED,
            HtmlTemplate(UnauthorizedTemplate { auth }),
        )
            .into_response();
    }
    if !auth.is_admin {
        tracing::debug!("non admin request to the admin page");
        return (StatusCode::FORBIDDEN, HtmlTemplate(ForbiddenTemplate { auth })).into_response();
    }
    HtmlTemplate(AdminTemplate { auth }).into_response()
}

pub async fn profile(Extension(auth): Extension<AuthState>) -> impl IntoResponse {
    if !auth.is_auth {
        tracing::debug!("unauthorized request to the profile page");
        return (
            StatusCode::UNAUTHORIZED,
            HtmlTemplate(UnauthorizedTemplate { auth }),
        )
            .into_response();
    }
    HtmlTemplate(ProfileTemplate { auth }).into_response()
}

pub async fn fallback(auth: Option<Extension<AuthState>>) -> impl IntoResponse {
    let auth = auth.map(|Extension(auth)| auth).unwrap_or_default();
    (StatusCode::NOT_FOUND, HtmlTemplate(NotFoundTemplate { auth }))
}
