//! Twitch adapter: OAuth2 + Helix over reqwest.
//!
//! Implements [`FollowerProvider`] for the id.twitch.tv OAuth endpoints and the
//! Helix `users` / `users/follows` resources. Helix rate-limit headers feed a
//! shared gate so a drained bucket delays the next call until its reset.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use ttg_core::{
    domain::{TwitchId, TwitchUser},
    errors::Error,
    followers::{
        credential::AppCredential,
        ratelimit::{RateLimitGate, RateLimitInfo},
    },
    ports::{FollowEdge, FollowPage, FollowQuery, FollowerProvider},
    Result,
};

pub const AUTH_BASE: &str = "https://id.twitch.tv/oauth2";
pub const API_BASE: &str = "https://api.twitch.tv/helix";
pub const SCOPES: &[&str] = &["user:read:follows", "user:read:subscriptions"];
const PAGE_SIZE: &str = "100";
/// Assumed lifetime when the token endpoint omits `expires_in`; a 401 still
/// invalidates the credential early.
const FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug)]
pub struct HelixConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_base: String,
    pub api_base: String,
}

impl HelixConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_base: AUTH_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }
}

pub struct HelixClient {
    cfg: HelixConfig,
    http: reqwest::Client,
    gate: RateLimitGate,
}

/// Which token a request carries; decides how a 401 is classified.
#[derive(Clone, Copy, Debug)]
enum Auth<'a> {
    App(&'a str),
    User(&'a str),
}

impl HelixClient {
    pub fn new(cfg: HelixConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::External(format!("reqwest client build: {e}")))?;
        Ok(Self {
            cfg,
            http,
            gate: RateLimitGate::new(),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .http
            .post(format!("{}/token", self.cfg.auth_base))
            .form(form)
            .send()
            .await
            .map_err(|e| Error::ProviderApi(format!("twitch token request error: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::ProviderAuthFailed(format!(
                "twitch token endpoint: {status} {}",
                error_message(&body)
            )));
        }
        parse_token_response(&body)
    }

    async fn helix_get(&self, auth: Auth<'_>, path: &str, query: &[(&str, &str)]) -> Result<String> {
        self.gate.wait_ready().await;

        let token = match auth {
            Auth::App(t) | Auth::User(t) => t,
        };
        let resp = self
            .http
            .get(format!("{}/{path}", self.cfg.api_base))
            .query(query)
            .header("Client-Id", &self.cfg.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::ProviderApi(format!("helix request error: {e}")))?;

        self.gate.observe(rate_limit_from_headers(resp.headers())).await;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(body);
        }
        debug!(%status, path, "helix call failed");
        Err(classify_failure(auth, status, &body))
    }
}

#[async_trait]
impl FollowerProvider for HelixClient {
    fn authorization_url(&self, state: &str) -> Result<String> {
        authorization_url(&self.cfg, state)
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let form = [
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.cfg.redirect_uri.as_str()),
        ];
        Ok(self.token_request(&form).await?.access_token)
    }

    async fn current_user(&self, user_token: &str) -> Result<TwitchUser> {
        let body = self.helix_get(Auth::User(user_token), "users", &[]).await?;
        parse_users(&body)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderAuthFailed("token resolved to no twitch user".to_string()))
    }

    async fn request_app_token(&self) -> Result<AppCredential> {
        let form = [
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];
        let token = self.token_request(&form).await.map_err(|e| match e {
            Error::ProviderAuthFailed(msg) => Error::ProviderApi(msg),
            other => other,
        })?;
        Ok(AppCredential::new(
            token.access_token,
            app_token_lifetime(token.expires_in),
        ))
    }

    async fn lookup_login(&self, app_token: &str, login: &str) -> Result<Option<TwitchUser>> {
        let body = self
            .helix_get(Auth::App(app_token), "users", &[("login", login)])
            .await?;
        Ok(parse_users(&body)?.into_iter().next())
    }

    async fn follows_page(
        &self,
        app_token: &str,
        query: FollowQuery,
        cursor: Option<&str>,
    ) -> Result<FollowPage> {
        let id;
        let mut params: Vec<(&str, &str)> = vec![("first", PAGE_SIZE)];
        match query {
            FollowQuery::FollowersOf(channel) => {
                id = channel.to_string();
                params.push(("to_id", id.as_str()));
            }
            FollowQuery::FollowedBy(user) => {
                id = user.to_string();
                params.push(("from_id", id.as_str()));
            }
        }
        if let Some(after) = cursor.filter(|c| !c.is_empty()) {
            params.push(("after", after));
        }

        let body = self
            .helix_get(Auth::App(app_token), "users/follows", &params)
            .await?;
        parse_follow_page(&body)
    }
}

pub fn authorization_url(cfg: &HelixConfig, state: &str) -> Result<String> {
    let scope = SCOPES.join(" ");
    let url = Url::parse_with_params(
        &format!("{}/authorize", cfg.auth_base),
        &[
            ("client_id", cfg.client_id.as_str()),
            ("redirect_uri", cfg.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
        ],
    )
    .map_err(|e| Error::Config(format!("invalid twitch auth url: {e}")))?;
    Ok(url.to_string())
}

// ============== Wire types ==============

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct HelixFollow {
    from_id: String,
    to_id: String,
}

#[derive(Debug, Deserialize)]
struct HelixError {
    #[serde(default)]
    message: String,
}

fn parse_token_response(body: &str) -> Result<TokenResponse> {
    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::ProviderAuthFailed(format!("malformed twitch token response: {e}")))?;
    if token.access_token.is_empty() {
        return Err(Error::ProviderAuthFailed(
            "twitch token response without access_token".to_string(),
        ));
    }
    Ok(token)
}

fn app_token_lifetime(expires_in: u64) -> Duration {
    match expires_in {
        0 => FALLBACK_TOKEN_LIFETIME,
        secs => Duration::from_secs(secs),
    }
}

fn parse_twitch_id(raw: &str) -> Result<TwitchId> {
    TwitchId::parse(raw).ok_or_else(|| Error::ProviderApi(format!("non-numeric twitch id: {raw:?}")))
}

fn parse_users(body: &str) -> Result<Vec<TwitchUser>> {
    let env: DataEnvelope<HelixUser> = serde_json::from_str(body)
        .map_err(|e| Error::ProviderApi(format!("malformed helix users response: {e}")))?;
    env.data
        .into_iter()
        .map(|u| {
            Ok(TwitchUser {
                id: parse_twitch_id(&u.id)?,
                login: u.login,
                display_name: u.display_name,
            })
        })
        .collect()
}

fn parse_follow_page(body: &str) -> Result<FollowPage> {
    let env: DataEnvelope<HelixFollow> = serde_json::from_str(body)
        .map_err(|e| Error::ProviderApi(format!("malformed helix follows response: {e}")))?;
    let edges = env
        .data
        .iter()
        .map(|f| {
            Ok(FollowEdge {
                from: parse_twitch_id(&f.from_id)?,
                to: parse_twitch_id(&f.to_id)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let cursor = env
        .pagination
        .and_then(|p| p.cursor)
        .filter(|c| !c.is_empty());
    Ok(FollowPage { edges, cursor })
}

fn rate_limit_from_headers(headers: &HeaderMap) -> RateLimitInfo {
    let num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
    };
    RateLimitInfo {
        remaining: num("ratelimit-remaining").and_then(|n| u32::try_from(n).ok()),
        reset_unix: num("ratelimit-reset"),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<HelixError>(body)
        .ok()
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn classify_failure(auth: Auth<'_>, status: StatusCode, body: &str) -> Error {
    let msg = format!("{status} {}", error_message(body));
    match (auth, status) {
        (Auth::App(_), StatusCode::UNAUTHORIZED) => {
            warn!(%status, "helix rejected app credential");
            Error::CredentialRejected(msg)
        }
        (Auth::User(_), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            Error::ProviderAuthFailed(msg)
        }
        _ => Error::ProviderApi(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::{Instant, SystemTime, UNIX_EPOCH},
    };

    use reqwest::header::HeaderValue;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    fn cfg() -> HelixConfig {
        HelixConfig::new("cid", "secret", "https://bot.example.org:8444/auth/callback")
    }

    #[test]
    fn authorization_url_carries_state_scopes_and_redirect() {
        let url = authorization_url(&cfg(), "0b7d8a34-5c1e-4c52-9a8f-1f0e6a3a9d11").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let q: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://id.twitch.tv/oauth2/authorize?"));
        assert_eq!(q["client_id"], "cid");
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["scope"], "user:read:follows user:read:subscriptions");
        assert_eq!(q["state"], "0b7d8a34-5c1e-4c52-9a8f-1f0e6a3a9d11");
        assert_eq!(q["redirect_uri"], "https://bot.example.org:8444/auth/callback");
    }

    #[test]
    fn follow_page_parses_edges_and_cursor() {
        let body = r#"{
            "total": 3,
            "data": [
                {"from_id": "100", "from_login": "a", "to_id": "777", "to_name": "Chan"},
                {"from_id": "200", "from_login": "b", "to_id": "777", "to_name": "Chan"}
            ],
            "pagination": {"cursor": "eyJiIjpudWxs"}
        }"#;
        let page = parse_follow_page(body).unwrap();
        assert_eq!(
            page.edges,
            vec![
                FollowEdge {
                    from: TwitchId(100),
                    to: TwitchId(777),
                },
                FollowEdge {
                    from: TwitchId(200),
                    to: TwitchId(777),
                },
            ]
        );
        assert_eq!(page.cursor.as_deref(), Some("eyJiIjpudWxs"));
    }

    #[test]
    fn last_page_has_no_cursor() {
        let page = parse_follow_page(r#"{"data": [], "pagination": {}}"#).unwrap();
        assert!(page.edges.is_empty());
        assert_eq!(page.cursor, None);

        let page = parse_follow_page(r#"{"data": [], "pagination": {"cursor": ""}}"#).unwrap();
        assert_eq!(page.cursor, None);
    }

    #[test]
    fn users_parse_and_reject_bad_ids() {
        let users = parse_users(
            r#"{"data": [{"id": "141981764", "login": "twitchdev", "display_name": "TwitchDev"}]}"#,
        )
        .unwrap();
        assert_eq!(users[0].id, TwitchId(141981764));
        assert_eq!(users[0].display_name, "TwitchDev");

        let err = parse_users(r#"{"data": [{"id": "x", "login": "a", "display_name": "A"}]}"#);
        assert!(matches!(err, Err(Error::ProviderApi(_))));
    }

    #[test]
    fn token_response_requires_access_token() {
        let t = parse_token_response(r#"{"access_token": "abc", "expires_in": 5011271, "token_type": "bearer"}"#)
            .unwrap();
        assert_eq!(t.access_token, "abc");
        assert_eq!(t.expires_in, 5011271);

        assert!(matches!(
            parse_token_response(r#"{"access_token": ""}"#),
            Err(Error::ProviderAuthFailed(_))
        ));
    }

    #[test]
    fn missing_token_lifetime_falls_back() {
        assert_eq!(app_token_lifetime(0), FALLBACK_TOKEN_LIFETIME);
        assert_eq!(app_token_lifetime(5011271), Duration::from_secs(5011271));
    }

    #[test]
    fn rate_limit_headers_are_read() {
        let mut headers = HeaderMap::new();
        headers.insert("Ratelimit-Remaining", HeaderValue::from_static("0"));
        headers.insert("Ratelimit-Reset", HeaderValue::from_static("1700000000"));
        let info = rate_limit_from_headers(&headers);
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_unix, Some(1_700_000_000));

        let info = rate_limit_from_headers(&HeaderMap::new());
        assert_eq!(info.remaining, None);
    }

    #[test]
    fn unauthorized_is_classified_by_token_kind() {
        let body = r#"{"error": "Unauthorized", "status": 401, "message": "Invalid OAuth token"}"#;
        assert!(matches!(
            classify_failure(Auth::App("t"), StatusCode::UNAUTHORIZED, body),
            Error::CredentialRejected(m) if m.contains("Invalid OAuth token")
        ));
        assert!(matches!(
            classify_failure(Auth::User("t"), StatusCode::UNAUTHORIZED, body),
            Error::ProviderAuthFailed(_)
        ));
        assert!(matches!(
            classify_failure(Auth::App("t"), StatusCode::SERVICE_UNAVAILABLE, "oops"),
            Error::ProviderApi(_)
        ));
    }

    struct HelixStub {
        addr: SocketAddr,
        arrivals: Arc<Mutex<Vec<Instant>>>,
    }

    /// Local Helix stand-in: the first response drains the quota until
    /// `reset_unix`, later ones report plenty left.
    async fn helix_stub(reset_unix: i64) -> HelixStub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let seen = arrivals.clone();

        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&chunk[..n]),
                    }
                }
                let n = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(Instant::now());
                    seen.len()
                };
                let remaining = if n == 1 { 0 } else { 799 };
                let body = r#"{"data": [{"id": "777", "login": "chan", "display_name": "Chan"}]}"#;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
ratelimit-limit: 800\r\nratelimit-remaining: {remaining}\r\nratelimit-reset: {reset_unix}\r\n\
content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        HelixStub { addr, arrivals }
    }

    #[tokio::test]
    async fn drained_quota_delays_the_next_helix_call() {
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let stub = helix_stub(now_unix + 3).await;
        let client = HelixClient::new(HelixConfig {
            api_base: format!("http://{}", stub.addr),
            ..cfg()
        })
        .unwrap();

        let user = client.lookup_login("app", "chan").await.unwrap();
        assert_eq!(user.map(|u| u.id), Some(TwitchId(777)));

        let started = Instant::now();
        client.lookup_login("app", "chan").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));

        let arrivals = stub.arrivals.lock().unwrap().clone();
        assert_eq!(arrivals.len(), 2);
        assert!(arrivals[1] - arrivals[0] >= Duration::from_secs(1));
    }
}
