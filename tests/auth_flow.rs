use argon2::Params;
use async_trait::async_trait;
use auth_demo::auth::{
    MemorySessionStore, MemoryUserStore, NewUser, PasswordHasher, SessionId, SessionRecord,
    SessionStore, SessionUser, User, UserId, UserStore, UserStoreError, CREDENTIALS_ERROR,
    INVALID_INPUT_ERROR, USER_EXISTS_ERROR,
};
use auth_demo::settings;
use auth_demo::{app, create_admin, set_admin, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// A browser with a one cookie jar.
struct TestClient {
    app: Router,
    users: MemoryUserStore,
    sessions: MemorySessionStore,
    hasher: PasswordHasher,
    cookie: Option<String>,
}

impl TestClient {
    fn new() -> TestClient {
        TestClient::with_sessions(MemorySessionStore::new())
    }

    fn with_sessions(sessions: MemorySessionStore) -> TestClient {
        let users = MemoryUserStore::new();
        let hasher = cheap_hasher();
        TestClient {
            app: test_app(Arc::new(users.clone()), sessions.clone()),
            users,
            sessions,
            hasher,
            cookie: None,
        }
    }

    async fn send(&mut self, request: Request<Body>) -> Response {
        let response = self.app.clone().oneshot(request).await.unwrap();
        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let set_cookie = set_cookie.to_str().unwrap();
            let pair = set_cookie.split(';').next().unwrap().to_string();
            if set_cookie.contains("Max-Age=0") {
                self.cookie = None;
            } else {
                self.cookie = Some(pair);
            }
        }
        response
    }

    async fn get(&mut self, uri: &str) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post(&mut self, uri: &str, form: &str) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(form.to_string())).unwrap())
            .await
    }

    async fn signup(&mut self, email: &str, confirm: &str, password: &str) -> Response {
        let form = format!(
            "email={}&confirm-email={}&password={}",
            encode(email),
            encode(confirm),
            encode(password)
        );
        self.post("/signup", &form).await
    }

    async fn login(&mut self, email: &str, password: &str) -> Response {
        let form = format!("email={}&password={}", encode(email), encode(password));
        self.post("/login", &form).await
    }
}

fn cheap_hasher() -> PasswordHasher {
    PasswordHasher::with_params(Params::new(8, 1, 1, None).unwrap())
}

fn test_app(users: Arc<dyn UserStore>, sessions: MemorySessionStore) -> Router {
    app(AppState {
        users,
        sessions: Arc::new(sessions),
        hasher: cheap_hasher(),
        cookie: settings::Session::default(),
    })
}

/// A database that cannot be reached.
struct UnreachableUserStore;

#[async_trait]
impl UserStore for UnreachableUserStore {
    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, UserStoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn find_by_id(&self, _id: UserId) -> Result<Option<User>, UserStoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn insert(&self, _user: NewUser) -> Result<UserId, UserStoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn set_admin(&self, _email: &str, _is_admin: bool) -> Result<bool, UserStoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
}

/// Another signup for the same email lands between the lookup and the
/// insert.
struct RacedUserStore;

#[async_trait]
impl UserStore for RacedUserStore {
    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, UserStoreError> {
        Ok(None)
    }

    async fn find_by_id(&self, _id: UserId) -> Result<Option<User>, UserStoreError> {
        Ok(None)
    }

    async fn insert(&self, _user: NewUser) -> Result<UserId, UserStoreError> {
        Err(UserStoreError::AlreadyExists)
    }

    async fn set_admin(&self, _email: &str, _is_admin: bool) -> Result<bool, UserStoreError> {
        Ok(false)
    }
}

fn form_post(uri: &str, form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

fn encode(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('@', "%40")
        .replace(' ', "+")
        .replace('&', "%26")
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn signup_creates_one_user_and_redirects_to_login() {
    let mut client = TestClient::new();
    let response = client.signup("a@b.com", "a@b.com", "secret").await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    // No session needed for a successful signup.
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    assert_eq!(client.users.len().await, 1);
    let user = client.users.find_by_email("a@b.com").await.unwrap().unwrap();
    assert!(!user.is_admin);
    assert!(client.hasher.verify("secret", &user.password_hash).unwrap());
    assert!(!client.hasher.verify("secret1", &user.password_hash).unwrap());
    assert!(!client.hasher.verify("wrong", &user.password_hash).unwrap());
}

#[tokio::test]
async fn signup_with_existing_email_shows_error_once() {
    let mut client = TestClient::new();
    client.signup("a@b.com", "a@b.com", "secret").await;

    let response = client.signup("a@b.com", "a@b.com", "another").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signup");
    assert_eq!(client.users.len().await, 1);

    let page = body_text(client.get("/signup").await).await;
    assert!(page.contains(USER_EXISTS_ERROR));
    assert!(page.contains(r#"value="a@b.com""#));
    assert!(page.contains(r#"value="another""#));

    // The stashed input is consumed by the first render.
    let page = body_text(client.get("/signup").await).await;
    assert!(!page.contains(USER_EXISTS_ERROR));
    assert!(!page.contains(r#"value="a@b.com""#));
}

#[tokio::test]
async fn invalid_signup_never_creates_a_user() {
    let cases = [
        ("a@b.com", "a@c.com", "secret"),
        ("a@b.com", "a@b.com", "short"),
        ("a@b.com", "a@b.com", "     five     "),
        ("ab.com", "ab.com", "secret"),
        ("", "", "secret"),
    ];
    for (email, confirm, password) in cases {
        let mut client = TestClient::new();
        let response = client.signup(email, confirm, password).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/signup");
        assert!(client.users.is_empty().await);

        let page = body_text(client.get("/signup").await).await;
        assert!(page.contains(INVALID_INPUT_ERROR), "no error for {:?}", email);
        assert!(page.contains(&format!(r#"value="{}""#, email)));
        assert!(page.contains(&format!(r#"value="{}""#, confirm)));
        assert!(page.contains(&format!(r#"value="{}""#, password.trim())));
    }
}

#[tokio::test]
async fn signup_with_missing_fields_is_rejected() {
    let mut client = TestClient::new();
    let response = client.post("/signup", "email=a%40b.com").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signup");
    assert!(client.users.is_empty().await);
}

#[tokio::test]
async fn login_errors_do_not_reveal_which_field_was_wrong() {
    let mut client = TestClient::new();
    client.signup("a@b.com", "a@b.com", "secret").await;

    let response = client.login("a@b.com", "wrong").await;
    assert_eq!(location(&response), "/login");
    let wrong_password = body_text(client.get("/login").await).await;

    let response = client.login("nobody@b.com", "secret").await;
    assert_eq!(location(&response), "/login");
    let unknown_email = body_text(client.get("/login").await).await;

    assert!(wrong_password.contains(CREDENTIALS_ERROR));
    assert!(unknown_email.contains(CREDENTIALS_ERROR));
    assert!(wrong_password.contains(r#"value="a@b.com""#));

    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regular_user_lands_on_profile() {
    let mut client = TestClient::new();
    client.signup("a@b.com", "a@b.com", "secret").await;

    let response = client.login("a@b.com", "secret").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/profile");
    assert!(client.cookie.is_some());
    assert_eq!(client.sessions.len().await, 1);

    assert_eq!(client.get("/profile").await.status(), StatusCode::OK);
    assert_eq!(client.get("/admin").await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_user_lands_on_admin_page() {
    let mut client = TestClient::new();
    create_admin(&client.users, &client.hasher, "root@b.com", "supersecret")
        .await
        .unwrap();

    let response = client.login("root@b.com", "supersecret").await;
    assert_eq!(location(&response), "/admin");

    let response = client.get("/admin").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Administration"));
    assert_eq!(client.get("/profile").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn revoked_admin_loses_access_without_logging_out() {
    let mut client = TestClient::new();
    create_admin(&client.users, &client.hasher, "root@b.com", "supersecret")
        .await
        .unwrap();
    client.login("root@b.com", "supersecret").await;
    assert_eq!(client.get("/admin").await.status(), StatusCode::OK);

    set_admin(&client.users, "root@b.com", false).await.unwrap();
    assert_eq!(client.get("/admin").await.status(), StatusCode::FORBIDDEN);
    assert_eq!(client.get("/profile").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn deleted_user_is_anonymous() {
    let mut client = TestClient::new();
    client.signup("a@b.com", "a@b.com", "secret").await;
    client.login("a@b.com", "secret").await;
    assert_eq!(client.get("/profile").await.status(), StatusCode::OK);

    let user = client.users.find_by_email("a@b.com").await.unwrap().unwrap();
    client.users.remove(user.id).await;
    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_makes_later_requests_anonymous() {
    let mut client = TestClient::new();
    create_admin(&client.users, &client.hasher, "root@b.com", "supersecret")
        .await
        .unwrap();
    client.login("root@b.com", "supersecret").await;
    let old_cookie = client.cookie.clone();

    let response = client.post("/logout", "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert!(client.cookie.is_none());
    assert!(client.sessions.is_empty().await);

    assert_eq!(client.get("/admin").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);

    // Replaying the old cookie does not help either.
    client.cookie = old_cookie;
    assert_eq!(client.get("/admin").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anonymous_requests() {
    let mut client = TestClient::new();
    let response = client.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(r#"href="/login""#));

    assert_eq!(client.get("/admin").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.get("/login").await.status(), StatusCode::OK);
    assert_eq!(client.get("/signup").await.status(), StatusCode::OK);
    assert_eq!(client.get("/nowhere").await.status(), StatusCode::NOT_FOUND);

    client.cookie = Some(format!("auth-demo.sid={}", "x".repeat(64)));
    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);

    // Rendering pages never creates sessions.
    assert!(client.sessions.is_empty().await);
}

#[tokio::test]
async fn consumed_input_data_does_not_keep_sessions_alive() {
    let sessions = MemorySessionStore::new();
    for _ in 0..50 {
        let mut client = TestClient::with_sessions(sessions.clone());
        client.login("nobody@b.com", "secret").await;
        assert!(client.cookie.is_some());
        let page = body_text(client.get("/login").await).await;
        assert!(page.contains(CREDENTIALS_ERROR));
        assert!(client.cookie.is_none());
    }
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn consuming_input_data_keeps_a_logged_in_session() {
    let mut client = TestClient::new();
    client.signup("a@b.com", "a@b.com", "secret").await;
    client.login("a@b.com", "secret").await;

    // Logged in users can still fail a signup.
    client.signup("a@b.com", "a@b.com", "secret").await;
    let page = body_text(client.get("/signup").await).await;
    assert!(page.contains(USER_EXISTS_ERROR));
    assert!(client.cookie.is_some());
    assert_eq!(client.get("/profile").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn expired_session_is_anonymous() {
    let mut client = TestClient::with_sessions(MemorySessionStore::with_ttl(Duration::ZERO));
    client.signup("a@b.com", "a@b.com", "secret").await;
    let response = client.login("a@b.com", "secret").await;
    assert_eq!(location(&response), "/profile");

    assert_eq!(client.get("/profile").await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(client.get("/admin").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreachable_user_store_makes_requests_anonymous() {
    let sessions = MemorySessionStore::new();
    let id = SessionId::random();
    let record = SessionRecord {
        user: Some(SessionUser {
            id: "1".to_string(),
            email: "root@b.com".to_string(),
            is_admin: true,
        }),
        is_authenticated: true,
        input_data: None,
    };
    sessions.save(&id, record).await.unwrap();
    let app = test_app(Arc::new(UnreachableUserStore), sessions);

    for uri in ["/profile", "/admin"] {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::COOKIE, format!("auth-demo.sid={}", id.as_str()))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn unreachable_user_store_fails_login_with_error_page() {
    let app = test_app(Arc::new(UnreachableUserStore), MemorySessionStore::new());
    let response = app
        .oneshot(form_post("/login", "email=a%40b.com&password=secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("Something went wrong"));
}

#[tokio::test]
async fn signup_losing_an_insert_race_reports_existing_user() {
    let sessions = MemorySessionStore::new();
    let app = test_app(Arc::new(RacedUserStore), sessions.clone());
    let response = app
        .clone()
        .oneshot(form_post(
            "/signup",
            "email=a%40b.com&confirm-email=a%40b.com&password=secret",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/signup");
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap();
    let cookie = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();

    let request = Request::builder()
        .method("GET")
        .uri("/signup")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let page = body_text(app.oneshot(request).await.unwrap()).await;
    assert!(page.contains(USER_EXISTS_ERROR));
    assert!(page.contains(r#"value="a@b.com""#));
}

#[tokio::test]
async fn non_form_body_gets_error_page() {
    let mut client = TestClient::new();
    for uri in ["/login", "/signup"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("email=a@b.com"))
            .unwrap();
        let response = client.send(request).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("Something went wrong"));
    }
    assert!(client.users.is_empty().await);
}
