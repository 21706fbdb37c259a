//! Remote token issuance, refresh and logout.

use crate::config::ApiConfig;
use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Username/password pair for the token endpoint
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Tokens issued on a successful login
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Tokens returned by the refresh endpoint; `refresh` is only present when
/// the server rotates refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Trait for the authentication server to allow mocking
pub trait AuthEndpoint {
    fn obtain_token(&self, credentials: &Credentials) -> SessionResult<TokenPair>;
    fn logout(&self, refresh: &str, access: &str) -> SessionResult<()>;
    fn refresh(&self, refresh: &str) -> SessionResult<RefreshedTokens>;
}

pub struct HttpAuthEndpoint {
    token_url: String,
    refresh_url: String,
    logout_url: String,
    agent: ureq::Agent,
}

impl HttpAuthEndpoint {
    pub fn new(api: &ApiConfig) -> Self {
        let base = api.base_url.trim_end_matches('/');
        Self {
            token_url: format!("{}{}", base, api.token_path),
            refresh_url: format!("{}{}", base, api.refresh_path),
            logout_url: format!("{}{}", base, api.logout_path),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(api.timeout_ms))
                .build(),
        }
    }
}

impl AuthEndpoint for HttpAuthEndpoint {
    fn obtain_token(&self, credentials: &Credentials) -> SessionResult<TokenPair> {
        tracing::debug!(url = %self.token_url, "requesting token pair");

        let resp = self
            .agent
            .post(&self.token_url)
            .set("Content-Type", "application/json")
            .send_json(json!({
                "username": credentials.username,
                "password": credentials.password,
            }));

        match resp {
            Ok(r) => r
                .into_json::<TokenPair>()
                .map_err(|e| SessionError::Transport(format!("unreadable token response: {}", e))),
            Err(ureq::Error::Status(code @ (400 | 401), resp)) => {
                Err(SessionError::Authentication(status_detail(code, resp)))
            }
            Err(ureq::Error::Status(code, resp)) => {
                Err(SessionError::Transport(status_detail(code, resp)))
            }
            Err(e) => Err(SessionError::Transport(format!("request failed: {}", e))),
        }
    }

    fn logout(&self, refresh: &str, access: &str) -> SessionResult<()> {
        tracing::debug!(url = %self.logout_url, "revoking refresh token");

        let resp = self
            .agent
            .post(&self.logout_url)
            .set("Authorization", &format!("Bearer {}", access))
            .set("Content-Type", "application/json")
            .send_json(json!({ "refresh": refresh }));

        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code @ (401 | 403), resp)) => {
                Err(SessionError::Authentication(status_detail(code, resp)))
            }
            Err(ureq::Error::Status(code, resp)) => {
                Err(SessionError::Transport(status_detail(code, resp)))
            }
            Err(e) => Err(SessionError::Transport(format!("request failed: {}", e))),
        }
    }

    fn refresh(&self, refresh: &str) -> SessionResult<RefreshedTokens> {
        tracing::debug!(url = %self.refresh_url, "refreshing access token");

        let resp = self
            .agent
            .post(&self.refresh_url)
            .set("Content-Type", "application/json")
            .send_json(json!({ "refresh": refresh }));

        match resp {
            Ok(r) => r.into_json::<RefreshedTokens>().map_err(|e| {
                SessionError::Transport(format!("unreadable refresh response: {}", e))
            }),
            Err(ureq::Error::Status(code @ (400 | 401), resp)) => {
                Err(SessionError::Authentication(status_detail(code, resp)))
            }
            Err(ureq::Error::Status(code, resp)) => {
                Err(SessionError::Transport(status_detail(code, resp)))
            }
            Err(e) => Err(SessionError::Transport(format!("request failed: {}", e))),
        }
    }
}

fn status_detail(code: u16, resp: ureq::Response) -> String {
    let body = resp.into_string().unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", code)
    } else {
        format!("HTTP {}: {}", code, truncate(body, 200))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::{serve_once, unreachable_base_url};
    use super::*;
    use std::time::Duration;

    fn api_for(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            timeout_ms: 2_000,
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "secret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_obtain_token_success() {
        let (base, rx) = serve_once(200, r#"{"access":"aaa.eyJpZCI6NX0.ccc","refresh":"rrr"}"#);
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        let pair = endpoint
            .obtain_token(&Credentials::new("alice", "secret"))
            .unwrap();
        assert_eq!(pair.access, "aaa.eyJpZCI6NX0.ccc");
        assert_eq!(pair.refresh, "rrr");

        let req = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(req.request_line, "POST /api/token/ HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["username"], "alice");
        assert_eq!(body["password"], "secret");
    }

    #[test]
    fn test_obtain_token_unauthorized_is_authentication_error() {
        let (base, _rx) = serve_once(
            401,
            r#"{"detail":"No active account found with the given credentials"}"#,
        );
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        let err = endpoint
            .obtain_token(&Credentials::new("alice", "wrong"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)), "{:?}", err);
    }

    #[test]
    fn test_obtain_token_server_error_is_transport_error() {
        let (base, _rx) = serve_once(500, r#"{"detail":"boom"}"#);
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        let err = endpoint
            .obtain_token(&Credentials::new("alice", "secret"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn test_obtain_token_bad_body_is_transport_error() {
        let (base, _rx) = serve_once(200, r#"{"token":"x"}"#);
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        let err = endpoint
            .obtain_token(&Credentials::new("alice", "secret"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn test_unreachable_server_is_transport_error() {
        let endpoint = HttpAuthEndpoint::new(&api_for(&unreachable_base_url()));
        let err = endpoint
            .obtain_token(&Credentials::new("alice", "secret"))
            .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)), "{:?}", err);
    }

    #[test]
    fn test_logout_sends_bearer_and_refresh() {
        let (base, rx) = serve_once(200, "{}");
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        endpoint.logout("rrr", "aaa.bbb.ccc").unwrap();

        let req = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(req.request_line, "POST /api/logout/ HTTP/1.1");
        assert_eq!(req.header("Authorization"), Some("Bearer aaa.bbb.ccc"));
        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["refresh"], "rrr");
    }

    #[test]
    fn test_refresh_without_rotation() {
        let (base, rx) = serve_once(200, r#"{"access":"new.eyJpZCI6NX0.sig"}"#);
        let endpoint = HttpAuthEndpoint::new(&api_for(&base));

        let tokens = endpoint.refresh("rrr").unwrap();
        assert_eq!(tokens.access, "new.eyJpZCI6NX0.sig");
        assert_eq!(tokens.refresh, None);

        let req = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(req.request_line, "POST /api/token/refresh/ HTTP/1.1");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("contraseña", 9), "contraseñ");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
