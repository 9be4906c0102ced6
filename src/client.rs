//! Blocking client for the Daikin Onecta cloud API (device listing only).
//!
//! - Uses `ureq`, no async.
//! - Returns device documents untyped; `crate::parser` owns their interpretation.
//!
//! Authentication
//! - Consumes the OIDC token set file written by the authorization-code flow
//!   (`access_token`, `refresh_token`, `expires_at`). The interactive flow itself
//!   is not performed here.
//! - Refreshes the access token shortly before expiry or after a 401 and
//!   persists the rotated token set back to the file.

use chrono::Utc;
use http::{HeaderMap, StatusCode};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const BASE_URL: &str = "https://api.onecta.daikineurope.com/v1";
const OIDC_TOKEN_URL: &str = "https://idp.onecta.daikineurope.com/v1/oidc/token";
/// Refresh this many seconds before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 30;

/// Anything that can produce the raw device documents for one poll cycle.
pub trait DeviceSource {
    fn fetch_devices(&self) -> Result<Vec<Value>, DaikinClientError>;
}

#[derive(Debug)]
pub enum DaikinClientError {
    TokenFile(String),
    Transport(String),
    Http { status: u16, message: String },
    RateLimited { retry_after: Option<u64> },
    Json(serde_json::Error),
    Auth(String),
}

impl fmt::Display for DaikinClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaikinClientError::TokenFile(s) => write!(f, "token file error: {}", s),
            DaikinClientError::Transport(s) => write!(f, "transport error: {}", s),
            DaikinClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            DaikinClientError::RateLimited { retry_after: Some(secs) } => {
                write!(f, "rate limited by Daikin Cloud, retry after {}s", secs)
            }
            DaikinClientError::RateLimited { retry_after: None } => write!(f, "rate limited by Daikin Cloud"),
            DaikinClientError::Json(e) => write!(f, "json error: {}", e),
            DaikinClientError::Auth(e) => write!(f, "auth error: {}", e),
        }
    }
}

impl std::error::Error for DaikinClientError {}

impl From<serde_json::Error> for DaikinClientError {
    fn from(value: serde_json::Error) -> Self {
        DaikinClientError::Json(value)
    }
}

impl From<ureq::Error> for DaikinClientError {
    fn from(value: ureq::Error) -> Self {
        DaikinClientError::Transport(value.to_string())
    }
}

/// OIDC token set as persisted on disk. Unknown fields are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TokenSet {
    pub fn load(path: &Path) -> Result<Self, DaikinClientError> {
        let content = fs::read_to_string(path).map_err(|e| {
            DaikinClientError::TokenFile(format!(
                "cannot read {} ({}); complete the Onecta authorization flow first",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| DaikinClientError::TokenFile(format!("{} is not a token set: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), DaikinClientError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| DaikinClientError::TokenFile(format!("write {}: {}", path.display(), e)))
    }

    pub fn needs_refresh(&self, now_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now_secs + REFRESH_MARGIN_SECS >= expires_at)
    }
}

/// Quota headers Onecta attaches to every API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitStatus {
    pub limit_minute: Option<u32>,
    pub remaining_minute: Option<u32>,
    pub limit_day: Option<u32>,
    pub remaining_day: Option<u32>,
}

impl RateLimitStatus {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
        };
        let status = RateLimitStatus {
            limit_minute: read("x-ratelimit-limit-minute"),
            remaining_minute: read("x-ratelimit-remaining-minute"),
            limit_day: read("x-ratelimit-limit-day"),
            remaining_day: read("x-ratelimit-remaining-day"),
        };
        (status != RateLimitStatus::default()).then_some(status)
    }
}

impl fmt::Display for RateLimitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "minute {}/{}, day {}/{}",
            show(self.remaining_minute),
            show(self.limit_minute),
            show(self.remaining_day),
            show(self.limit_day)
        )
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[derive(Debug)]
struct OidcState {
    client_id: String,
    client_secret: String,
    token_file: PathBuf,
    token: TokenSet,
}

pub struct DaikinClient {
    agent: ureq::Agent,
    oidc: RefCell<OidcState>,
}

impl DaikinClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_file: impl Into<PathBuf>,
    ) -> Result<Self, DaikinClientError> {
        let token_file = token_file.into();
        let token = TokenSet::load(&token_file)?;
        let agent: ureq::Agent = ureq::Agent::config_builder().http_status_as_error(false).build().into();

        if token.needs_refresh(Utc::now().timestamp()) {
            info!("Stored access token is expired; it will be refreshed on the first request");
        }

        // Refresh is deferred to the first request.
        Ok(DaikinClient {
            agent,
            oidc: RefCell::new(OidcState {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                token_file,
                token,
            }),
        })
    }

    fn url(path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", BASE_URL, path)
        } else {
            format!("{}/{}", BASE_URL, path)
        }
    }

    fn refresh_token(&self) -> Result<(), DaikinClientError> {
        #[derive(Deserialize)]
        struct R {
            access_token: String,
            expires_in: i64,
            #[serde(default)]
            refresh_token: Option<String>,
        }

        let mut s = self.oidc.borrow_mut();
        let refresh = s
            .token
            .refresh_token
            .clone()
            .ok_or_else(|| DaikinClientError::Auth("access token expired and no refresh token stored".into()))?;

        let mut resp = self
            .agent
            .post(OIDC_TOKEN_URL)
            .header("Accept", "application/json")
            .send_form([
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh.as_str()),
                ("client_id", s.client_id.as_str()),
                ("client_secret", s.client_secret.as_str()),
            ])?;
        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(DaikinClientError::Auth(format!("token refresh http {}: {}", status.as_u16(), body)));
        }

        let R {
            access_token,
            expires_in,
            refresh_token,
        } = serde_json::from_str(&body)?;
        s.token.access_token = access_token;
        s.token.expires_at = Some(Utc::now().timestamp() + expires_in);
        if refresh_token.is_some() {
            s.token.refresh_token = refresh_token;
        }

        // Refresh tokens rotate; the stored one is now invalid.
        if let Err(e) = s.token.save(&s.token_file) {
            warn!("Refreshed token could not be persisted: {}", e);
        }
        info!("Refreshed Daikin Cloud access token (valid for {}s)", expires_in);
        Ok(())
    }

    fn get_bearer(&self) -> Result<String, DaikinClientError> {
        let needs_refresh = self.oidc.borrow().token.needs_refresh(Utc::now().timestamp());
        if needs_refresh {
            self.refresh_token()?;
        }
        Ok(self.oidc.borrow().token.access_token.clone())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DaikinClientError> {
        let url = Self::url(path);
        let call = |token: &str| {
            self.agent
                .get(&url)
                .header("Accept", "application/json")
                .header("Authorization", format!("Bearer {}", token))
                .call()
        };

        let mut resp = call(&self.get_bearer()?)?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("GET {} returned 401; refreshing token and retrying once", path);
            self.refresh_token()?;
            resp = call(&self.get_bearer()?)?;
        }

        if let Some(limits) = RateLimitStatus::from_headers(resp.headers()) {
            info!("Rate limit status: {}", limits);
        }

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DaikinClientError::RateLimited {
                retry_after: retry_after_secs(resp.headers()),
            });
        }
        let body = resp.body_mut().read_to_string()?;
        if !status.is_success() {
            return Err(DaikinClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Full state documents of every device attached to the account.
    pub fn get_cloud_device_details(&self) -> Result<Vec<Value>, DaikinClientError> {
        self.get_json("/gateway-devices")
    }
}

impl DeviceSource for DaikinClient {
    fn fetch_devices(&self) -> Result<Vec<Value>, DaikinClientError> {
        self.get_cloud_device_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn token_set_round_trips_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenset.json");
        fs::write(
            &path,
            r#"{"access_token":"a","refresh_token":"r","expires_at":1760000000,"token_type":"Bearer","scope":"openid onecta:basic.integration"}"#,
        )
        .unwrap();

        let mut token = TokenSet::load(&path).unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
        assert_eq!(token.extra.get("token_type"), Some(&Value::from("Bearer")));

        token.access_token = "b".into();
        token.save(&path).unwrap();
        let reloaded = TokenSet::load(&path).unwrap();
        assert_eq!(reloaded.access_token, "b");
        assert_eq!(reloaded.extra.get("scope"), token.extra.get("scope"));
    }

    #[test]
    fn missing_token_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaikinClient::new("id", "secret", dir.path().join("absent")).err().unwrap();
        assert!(matches!(err, DaikinClientError::TokenFile(_)));
    }

    #[test]
    fn expired_token_set_builds_client_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenset.json");
        fs::write(&path, r#"{"access_token":"a","refresh_token":"r","expires_at":1}"#).unwrap();

        let client = DaikinClient::new("id", "secret", &path).ok().expect("client built from expired token set");
        let state = client.oidc.borrow();
        assert_eq!(state.token.access_token, "a");
        assert!(state.token.needs_refresh(Utc::now().timestamp()));
    }

    #[test]
    fn refresh_margin() {
        let token = TokenSet {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(1_000),
            extra: Default::default(),
        };
        assert!(!token.needs_refresh(900));
        assert!(token.needs_refresh(970));
        assert!(token.needs_refresh(2_000));

        let no_expiry = TokenSet { expires_at: None, ..token };
        assert!(!no_expiry.needs_refresh(i64::MAX / 2));
    }

    #[test]
    fn parses_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RateLimitStatus::from_headers(&headers), None);

        headers.insert("x-ratelimit-limit-minute", HeaderValue::from_static("20"));
        headers.insert("x-ratelimit-remaining-minute", HeaderValue::from_static("19"));
        headers.insert("x-ratelimit-limit-day", HeaderValue::from_static("200"));
        headers.insert("x-ratelimit-remaining-day", HeaderValue::from_static("bogus"));
        let status = RateLimitStatus::from_headers(&headers).unwrap();
        assert_eq!(status.limit_minute, Some(20));
        assert_eq!(status.remaining_minute, Some(19));
        assert_eq!(status.limit_day, Some(200));
        assert_eq!(status.remaining_day, None);
        assert_eq!(status.to_string(), "minute 19/20, day -/200");

        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("3600"));
        assert_eq!(retry_after_secs(&headers), Some(3600));
    }
}
