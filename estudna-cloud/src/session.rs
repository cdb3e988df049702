use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{Span, debug, field, info, instrument};

use crate::config::RemoteConfig;
use crate::error::Error;
use crate::token;
use crate::util::http::{Client, ClientError, Headers, Method, Query, StatusCode, Uri};
use crate::util::types::UserId;

const LOGIN_PATH: &str = "/apiv2/auth/login";
const TOKEN_PATH: &str = "/apiv2/auth/token";

// ThingsBoard reads the JWT from this header rather than `Authorization`
const AUTH_HEADER: &str = "X-Authorization";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/*
    response {
        token,
        refreshToken,
        user_id,
    }
*/
#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(alias = "userId")]
    user_id: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

/// The access and refresh tokens are only ever replaced as a pair.
struct Tokens {
    access: String,
    refresh: String,
}

#[derive(Default)]
struct SessionState {
    tokens: Option<Tokens>,
    user_id: Option<UserId>,
}

/// An authenticated session with the cloud.
///
/// The session starts unauthenticated and becomes authenticated on
/// [Session::login]. From then on, every authenticated request first checks
/// the access token expiry and exchanges the refresh token for a new pair if
/// needed. There is no logout: the session lives until it is dropped.
///
/// The token state is guarded by a lock that is held for the whole
/// check-and-refresh sequence, so a session shared between tasks performs at
/// most one refresh when several requests find the token expired at once.
pub struct Session {
    api_endpoint: Uri,
    client: Client,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            api_endpoint: config.api_endpoint.clone(),
            client: Client::new(Some(config.request.timeout)),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        let state = self.state.lock().await;
        state.tokens.is_some() && state.user_id.is_some()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.state.lock().await.user_id.clone()
    }

    fn endpoint(&self, path: &str) -> Result<Uri, Error> {
        Ok(Uri::from_parts(self.api_endpoint.clone(), path, None)?)
    }

    /// Exchange the user credentials for a token pair and the user id.
    ///
    /// This never tries to refresh tokens. The session is left untouched if
    /// the login fails.
    #[instrument(skip_all, fields(user_id = field::Empty), err)]
    pub async fn login(&self, username: &str, password: &str) -> Result<(), Error> {
        let endpoint = self.endpoint(LOGIN_PATH)?;

        debug!("calling remote");
        let response: LoginResponse = self
            .client
            .post(&endpoint, None, &LoginRequest { username, password })
            .await
            .map_err(unauthorized_as("invalid username or password"))?;

        let (Some(access), Some(refresh), Some(user_id)) = (
            non_empty(response.token),
            non_empty(response.refresh_token),
            non_empty(response.user_id),
        ) else {
            return Err(Error::Auth(
                "login response is missing token, refreshToken or user_id".into(),
            ));
        };

        Span::current().record("user_id", field::display(&user_id));

        let mut state = self.state.lock().await;
        state.tokens = Some(Tokens { access, refresh });
        state.user_id = Some(user_id.into());

        info!("login successful");
        Ok(())
    }

    /// Return an access token that has not expired yet, refreshing the token
    /// pair first if the current one is expired or missing.
    pub async fn ensure_valid_token(&self) -> Result<String, Error> {
        let mut state = self.state.lock().await;

        match &state.tokens {
            Some(tokens) if !token::is_expired(&tokens.access, Utc::now()) => {
                return Ok(tokens.access.clone());
            }
            Some(_) => debug!("access token expired"),
            None => debug!("no access token"),
        }

        self.refresh_locked(&mut state).await
    }

    /// Exchange the stored refresh token for a new token pair.
    pub async fn refresh_token(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await.map(|_| ())
    }

    #[instrument(skip_all, err)]
    async fn refresh_locked(&self, state: &mut SessionState) -> Result<String, Error> {
        let refresh_token = state
            .tokens
            .as_ref()
            .map(|tokens| tokens.refresh.clone())
            .ok_or_else(|| Error::Auth("no refresh token available, login first".into()))?;

        let endpoint = self.endpoint(TOKEN_PATH)?;
        let request = RefreshRequest {
            refresh_token: &refresh_token,
        };

        debug!("calling remote");
        let response: RefreshResponse = self
            .client
            .post(&endpoint, None, &request)
            .await
            .map_err(unauthorized_as("refresh token was rejected"))?;

        let (Some(access), Some(refresh)) = (
            non_empty(response.token),
            non_empty(response.refresh_token),
        ) else {
            return Err(Error::Auth(
                "token response is missing token or refreshToken".into(),
            ));
        };

        state.tokens = Some(Tokens {
            access: access.clone(),
            refresh,
        });

        info!("token successfully renewed");
        Ok(access)
    }

    /// Issue a request to `path` on the remote on behalf of the logged in user.
    ///
    /// The reply body is decoded as JSON. Non-2xx replies are returned as
    /// [Error::Transport].
    #[instrument(skip(self, query, body), err(level = "warn"))]
    pub async fn authenticated_request<Payload, Response>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Query>,
        body: Option<&Payload>,
    ) -> Result<Response, Error>
    where
        Payload: Serialize + ?Sized,
        Response: DeserializeOwned,
    {
        let access = self.ensure_valid_token().await?;
        let endpoint = self.endpoint(path)?;
        let headers = Headers::from([(AUTH_HEADER.to_string(), format!("Bearer {access}"))]);

        let response = self
            .client
            .send(method, &endpoint, query, Some(&headers), body)
            .await?;

        Ok(response)
    }

    /// Shorthand for an authenticated GET without a body.
    pub async fn get<Response>(&self, path: &str, query: Option<&Query>) -> Result<Response, Error>
    where
        Response: DeserializeOwned,
    {
        self.authenticated_request::<(), Response>(Method::GET, path, query, None)
            .await
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn unauthorized_as(reason: &'static str) -> impl FnOnce(ClientError) -> Error {
    move |err| match err.status() {
        Some(StatusCode::UNAUTHORIZED) => Error::Auth(reason.to_string()),
        _ => Error::Transport(err),
    }
}

#[cfg(test)]
pub(crate) fn test_config(url: String) -> RemoteConfig {
    RemoteConfig {
        api_endpoint: url.parse().unwrap(),
        ..RemoteConfig::default()
    }
}

/// Return a session logged in with the given access token and
/// `refresh-1`/`user-1` as refresh token and user id.
#[cfg(test)]
pub(crate) async fn login_with(server: &mut mockito::ServerGuard, access_token: &str) -> Session {
    let login = server
        .mock("POST", LOGIN_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "token": access_token,
                "refreshToken": "refresh-1",
                "user_id": "user-1",
            })
            .to_string(),
        )
        .create_async()
        .await;

    let session = Session::new(&test_config(server.url()));
    session.login("user@example.com", "secret").await.unwrap();
    login.assert_async().await;

    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::mint;
    use mockito::{Matcher, Server};
    use serde_json::{Value, json};

    fn valid_token() -> String {
        mint(Utc::now().timestamp() + 3600)
    }

    fn expired_token() -> String {
        mint(Utc::now().timestamp() - 60)
    }

    #[tokio::test]
    async fn test_login_stores_tokens_and_user_id() {
        let mut server = Server::new_async().await;
        let token = valid_token();
        let login = server
            .mock("POST", LOGIN_PATH)
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(
                json!({"username": "user@example.com", "password": "secret"}),
            ))
            .with_status(200)
            .with_body(json!({"token": token, "refreshToken": "r1", "user_id": "u1"}).to_string())
            .create_async()
            .await;
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let session = Session::new(&test_config(server.url()));
        assert!(!session.is_authenticated().await);

        session.login("user@example.com", "secret").await.unwrap();

        assert!(session.is_authenticated().await);
        assert_eq!(session.user_id().await, Some(UserId::from("u1")));
        assert_eq!(session.ensure_valid_token().await.unwrap(), token);

        login.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_accepts_camel_case_user_id() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", LOGIN_PATH)
            .with_status(200)
            .with_body(
                json!({"token": valid_token(), "refreshToken": "r1", "userId": "u2"}).to_string(),
            )
            .create_async()
            .await;

        let session = Session::new(&test_config(server.url()));
        session.login("user@example.com", "secret").await.unwrap();

        assert_eq!(session.user_id().await, Some(UserId::from("u2")));
    }

    #[tokio::test]
    async fn test_login_fails_when_response_lacks_a_field() {
        let token = valid_token();
        let responses = [
            json!({"refreshToken": "r1", "user_id": "u1"}),
            json!({"token": token, "user_id": "u1"}),
            json!({"token": token, "refreshToken": "r1"}),
            json!({"token": "", "refreshToken": "r1", "user_id": "u1"}),
        ];

        for body in responses {
            let mut server = Server::new_async().await;
            let _login = server
                .mock("POST", LOGIN_PATH)
                .with_status(200)
                .with_body(body.to_string())
                .create_async()
                .await;

            let session = Session::new(&test_config(server.url()));
            let res = session.login("user@example.com", "secret").await;

            assert!(matches!(res, Err(Error::Auth(_))), "accepted {body}");
            assert!(!session.is_authenticated().await);
        }
    }

    #[tokio::test]
    async fn test_login_rejected_credentials_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", LOGIN_PATH)
            .with_status(401)
            .create_async()
            .await;

        let session = Session::new(&test_config(server.url()));
        let res = session.login("user@example.com", "wrong").await;

        assert!(matches!(res, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_login_server_error_is_a_transport_error() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", LOGIN_PATH)
            .with_status(503)
            .create_async()
            .await;

        let session = Session::new(&test_config(server.url()));
        let res = session.login("user@example.com", "secret").await;

        assert!(matches!(
            res,
            Err(Error::Transport(ClientError::Response(
                StatusCode::SERVICE_UNAVAILABLE
            )))
        ));
    }

    #[tokio::test]
    async fn test_valid_token_is_not_refreshed() {
        let mut server = Server::new_async().await;
        let token = valid_token();
        let session = login_with(&mut server, &token).await;
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        assert_eq!(session.ensure_valid_token().await.unwrap(), token);
        assert_eq!(session.ensure_valid_token().await.unwrap(), token);

        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &expired_token()).await;
        let new_token = valid_token();
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::Json(json!({"refreshToken": "refresh-1"})))
            .with_status(200)
            .with_body(json!({"token": new_token, "refreshToken": "refresh-2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        assert_eq!(session.ensure_valid_token().await.unwrap(), new_token);
        // the new token is valid, no further refresh
        assert_eq!(session.ensure_valid_token().await.unwrap(), new_token);
        assert_eq!(session.user_id().await, Some(UserId::from("user-1")));

        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_uses_the_latest_refresh_token() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &valid_token()).await;
        let first = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::Json(json!({"refreshToken": "refresh-1"})))
            .with_status(200)
            .with_body(json!({"token": valid_token(), "refreshToken": "refresh-2"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::Json(json!({"refreshToken": "refresh-2"})))
            .with_status(200)
            .with_body(json!({"token": valid_token(), "refreshToken": "refresh-3"}).to_string())
            .expect(1)
            .create_async()
            .await;

        session.refresh_token().await.unwrap();
        session.refresh_token().await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_login_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .expect(0)
            .create_async()
            .await;

        let session = Session::new(&test_config(server.url()));

        assert!(matches!(session.refresh_token().await, Err(Error::Auth(_))));
        assert!(matches!(
            session.ensure_valid_token().await,
            Err(Error::Auth(_))
        ));

        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_response_without_tokens_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &expired_token()).await;
        let _refresh = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(json!({"token": valid_token()}).to_string())
            .create_async()
            .await;

        assert!(matches!(session.refresh_token().await, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_before_request() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &expired_token()).await;
        let new_token = valid_token();
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(json!({"token": new_token, "refreshToken": "refresh-2"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/apiv2/anything")
            .match_header("x-authorization", format!("Bearer {new_token}").as_str())
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .expect(2)
            .create_async()
            .await;

        let first: Value = session.get("/apiv2/anything", None).await.unwrap();
        let second: Value = session.get("/apiv2/anything", None).await.unwrap();

        assert_eq!(first, json!({"ok": true}));
        assert_eq!(second, json!({"ok": true}));
        refresh.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_a_single_refresh() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &expired_token()).await;
        let refresh = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(json!({"token": valid_token(), "refreshToken": "refresh-2"}).to_string())
            .expect(1)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/apiv2/anything")
            .with_status(200)
            .with_body("{}")
            .expect(3)
            .create_async()
            .await;

        let (a, b, c) = tokio::join!(
            session.get::<Value>("/apiv2/anything", None),
            session.get::<Value>("/apiv2/anything", None),
            session.get::<Value>("/apiv2/anything", None),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        refresh.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticated_request_forwards_query_and_body() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &valid_token()).await;
        let post = server
            .mock("POST", "/apiv2/things")
            .match_query(Matcher::UrlEncoded("limit".into(), "1".into()))
            .match_body(Matcher::Json(json!({"name": "well"})))
            .with_status(200)
            .with_body(r#"{"id": "t1"}"#)
            .create_async()
            .await;

        let query = [("limit".to_string(), "1".to_string())];
        let res: Value = session
            .authenticated_request(
                Method::POST,
                "/apiv2/things",
                Some(&query),
                Some(&json!({"name": "well"})),
            )
            .await
            .unwrap();

        assert_eq!(res, json!({"id": "t1"}));
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_authenticated_request_fails_on_error_status() {
        let mut server = Server::new_async().await;
        let session = login_with(&mut server, &valid_token()).await;
        let _get = server
            .mock("GET", "/apiv2/anything")
            .with_status(500)
            .create_async()
            .await;

        let res = session.get::<Value>("/apiv2/anything", None).await;

        assert!(matches!(
            res,
            Err(Error::Transport(ClientError::Response(
                StatusCode::INTERNAL_SERVER_ERROR
            )))
        ));
    }
}
