use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{BackupError, Result};
use crate::types::DeviceConnection;

/// Name of the appliance session cookie.
const TOKEN_COOKIE: &str = "TOKEN";

#[async_trait]
pub trait BackupTrigger: Send + Sync {
    /// Ask the appliance to write a fresh backup file.
    async fn regenerate(&self, device: &DeviceConnection) -> Result<()>;
}

pub struct ApplianceClient {
    client: reqwest::Client,
    login_path: String,
    backup_path: String,
}

/// Credentials obtained from a login.
#[derive(Debug, Default)]
struct ApplianceSession {
    bearer: Option<String>,
    cookie: Option<String>,
    csrf_token: Option<String>,
}

impl ApplianceClient {
    pub fn new(cfg: &AppConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.network_timeout)
            .connect_timeout(cfg.network_timeout.min(Duration::from_secs(10)))
            .danger_accept_invalid_certs(cfg.appliance_accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            login_path: cfg.appliance_login_path.clone(),
            backup_path: cfg.appliance_backup_path.clone(),
        })
    }

    async fn login(&self, device: &DeviceConnection) -> Result<ApplianceSession> {
        let url = format!("{}{}", device.base_url, self.login_path);
        let body = json!({ "username": device.username, "password": device.password });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp, "login").await?;

        let cookie = token_cookie(resp.headers());
        let csrf_token = cookie.as_deref().and_then(extract_csrf_token);

        // some firmware answers with an empty body
        let payload: JsonValue = resp.json().await.unwrap_or(JsonValue::Null);
        let bearer = ["deviceToken", "token"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(JsonValue::as_str))
            .map(str::to_string);

        debug!(
            bearer = bearer.is_some(),
            cookie = cookie.is_some(),
            csrf = csrf_token.is_some(),
            "appliance login accepted"
        );
        Ok(ApplianceSession {
            bearer,
            cookie,
            csrf_token,
        })
    }
}

#[async_trait]
impl BackupTrigger for ApplianceClient {
    async fn regenerate(&self, device: &DeviceConnection) -> Result<()> {
        let session = self.login(device).await?;

        let url = format!("{}{}", device.base_url, self.backup_path);
        let mut req = self.client.post(&url).json(&json!({ "cmd": "backup" }));
        if let Some(cookie) = &session.cookie {
            req = req.header(COOKIE, cookie);
        }
        if let Some(csrf) = &session.csrf_token {
            req = req.header("X-CSRF-Token", csrf);
        }
        if let Some(bearer) = &session.bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {bearer}"));
        }

        let resp = req.send().await.map_err(transport)?;
        check_status(resp, "backup").await?;

        info!(host = %device.host, "appliance backup regenerated");
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> BackupError {
    BackupError::Connection(e.to_string())
}

async fn check_status(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackupError::Authentication(
            format!("appliance {what}: HTTP {status}"),
        )),
        _ => Err(BackupError::Appliance {
            status: status.as_u16(),
            message: format!("{what}: {}", text.chars().take(200).collect::<String>()),
        }),
    }
}

/// `TOKEN=<jwt>` from the `Set-Cookie` headers, ready to send back.
fn token_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .find(|pair| {
            pair.split_once('=')
                .is_some_and(|(name, _)| name.trim() == TOKEN_COOKIE)
        })
        .map(str::to_string)
}

/// Pull the `csrfToken` claim out of a cookie string holding the session JWT.
/// Accepts a full cookie header (`a=b; TOKEN=<jwt>`) or a single pair.
pub fn extract_csrf_token(cookies: &str) -> Option<String> {
    let jwt = cookies
        .split(';')
        .map(str::trim)
        .find(|part| part.contains(TOKEN_COOKIE))?
        .split_once('=')?
        .1;

    let payload = jwt.split('.').nth(1)?;
    let decoded = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: JsonValue = serde_json::from_slice(&decoded).ok()?;

    claims
        .get("csrfToken")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use std::sync::{Arc, Mutex};

    fn jwt(claims: &JsonValue) -> String {
        let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn test_csrf_from_cookie_jwt() {
        let token = jwt(&json!({ "userId": "u1", "csrfToken": "abc-123" }));

        assert_eq!(
            extract_csrf_token(&format!("TOKEN={token}")).as_deref(),
            Some("abc-123")
        );
        assert_eq!(
            extract_csrf_token(&format!("theme=dark; TOKEN={token}; Path=/")).as_deref(),
            Some("abc-123")
        );
    }

    #[test]
    fn test_csrf_accepts_padded_payload() {
        let claims = general_purpose::URL_SAFE.encode(br#"{"csrfToken":"x"}"#);
        assert!(claims.ends_with('='));
        assert_eq!(
            extract_csrf_token(&format!("TOKEN=h.{claims}.s")).as_deref(),
            Some("x")
        );
    }

    #[test]
    fn test_csrf_missing_cases() {
        assert_eq!(extract_csrf_token("theme=dark"), None);
        assert_eq!(extract_csrf_token("TOKEN=not-a-jwt"), None);
        assert_eq!(extract_csrf_token(&format!("TOKEN={}", jwt(&json!({ "a": 1 })))), None);
    }

    #[test]
    fn test_token_cookie_from_set_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, "theme=dark; Path=/".parse().unwrap());
        headers.append(SET_COOKIE, "TOKEN=aaa.bbb.ccc; Path=/; HttpOnly".parse().unwrap());

        assert_eq!(token_cookie(&headers).as_deref(), Some("TOKEN=aaa.bbb.ccc"));
        assert_eq!(token_cookie(&HeaderMap::new()), None);
    }

    #[derive(Default)]
    struct Seen {
        cookie: Option<String>,
        csrf: Option<String>,
        auth: Option<String>,
        body: Option<JsonValue>,
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn device(base_url: String) -> DeviceConnection {
        DeviceConnection {
            host: "127.0.0.1".into(),
            username: "admin".into(),
            password: "pw".into(),
            base_url,
            ssh_port: 22,
        }
    }

    fn client() -> ApplianceClient {
        let cfg = AppConfig {
            network_timeout: Duration::from_secs(5),
            ..AppConfig::default()
        };
        ApplianceClient::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn test_regenerate_sends_session_headers() {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let token = jwt(&json!({ "csrfToken": "csrf-1" }));

        let login_token = token.clone();
        let seen_backup = seen.clone();
        let router = Router::new()
            .route(
                "/api/auth/login",
                post(move |Json(body): Json<JsonValue>| {
                    let token = login_token.clone();
                    async move {
                        assert_eq!(body["username"], "admin");
                        (
                            [("set-cookie", format!("TOKEN={token}; Path=/; HttpOnly"))],
                            Json(json!({ "deviceToken": "bearer-1" })),
                        )
                    }
                }),
            )
            .route(
                "/proxy/network/api/s/default/cmd/backup",
                post(move |headers: AxumHeaders, Json(body): Json<JsonValue>| {
                    let seen = seen_backup.clone();
                    async move {
                        let get = |k: &str| {
                            headers.get(k).and_then(|v| v.to_str().ok()).map(str::to_string)
                        };
                        let mut s = seen.lock().unwrap();
                        s.cookie = get("cookie");
                        s.csrf = get("x-csrf-token");
                        s.auth = get("authorization");
                        s.body = Some(body);
                        Json(json!({ "meta": { "rc": "ok" } }))
                    }
                }),
            );
        let base = serve(router).await;

        client().regenerate(&device(base)).await.unwrap();

        let s = seen.lock().unwrap();
        assert_eq!(s.cookie.as_deref(), Some(format!("TOKEN={token}").as_str()));
        assert_eq!(s.csrf.as_deref(), Some("csrf-1"));
        assert_eq!(s.auth.as_deref(), Some("Bearer bearer-1"));
        assert_eq!(s.body, Some(json!({ "cmd": "backup" })));
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let router = Router::new().route(
            "/api/auth/login",
            post(|| async { (AxumStatus::UNAUTHORIZED, "bad credentials").into_response() }),
        );
        let base = serve(router).await;

        let err = client().regenerate(&device(base)).await.unwrap_err();
        assert!(matches!(err, BackupError::Authentication(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_failed_trigger_reports_status() {
        let router = Router::new()
            .route("/api/auth/login", post(|| async { Json(json!({ "token": "t" })) }))
            .route(
                "/proxy/network/api/s/default/cmd/backup",
                post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response() }),
            );
        let base = serve(router).await;

        let err = client().regenerate(&device(base)).await.unwrap_err();
        assert!(matches!(err, BackupError::Appliance { status: 500, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_appliance_is_connection_error() {
        let err = client()
            .regenerate(&device("http://127.0.0.1:1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Connection(_)), "got {err:?}");
    }
}
