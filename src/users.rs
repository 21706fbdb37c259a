//! User resource client and the create/edit form model.

use crate::config::ApiConfig;
use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A user as returned by the API. The password is write-only and never
/// comes back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub dni: Option<u64>,
    #[serde(default)]
    pub phone_number: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

/// Field values typed on the command line or in the shell; unset fields keep
/// whatever the form already holds
#[derive(Debug, Clone, Default, PartialEq, Eq, clap::Args)]
pub struct UserFields {
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub dni: Option<String>,
    #[arg(long)]
    pub phone_number: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
}

/// The create/edit form. Fields are kept as typed; numbers are parsed when
/// the payload is built.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserDraft {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dni: String,
    pub phone_number: String,
    pub password: String,
}

impl std::fmt::Debug for UserDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDraft")
            .field("username", &self.username)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("dni", &self.dni)
            .field("phone_number", &self.phone_number)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl UserDraft {
    /// Pre-fill an edit form; the password starts blank
    pub fn from_record(record: &UserRecord) -> Self {
        Self {
            username: record.username.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            email: record.email.clone(),
            dni: record.dni.map(|n| n.to_string()).unwrap_or_default(),
            phone_number: record.phone_number.map(|n| n.to_string()).unwrap_or_default(),
            password: String::new(),
        }
    }

    pub fn apply(&mut self, fields: &UserFields) {
        let pairs = [
            (&mut self.username, &fields.username),
            (&mut self.first_name, &fields.first_name),
            (&mut self.last_name, &fields.last_name),
            (&mut self.email, &fields.email),
            (&mut self.dni, &fields.dni),
            (&mut self.phone_number, &fields.phone_number),
            (&mut self.password, &fields.password),
        ];
        for (slot, value) in pairs {
            if let Some(value) = value {
                *slot = value.trim().to_string();
            }
        }
    }

    /// First problem found, worded for the screen
    pub fn validate(&self, mode: FormMode) -> Result<(), SessionError> {
        let problem = if self.username.is_empty() {
            Some("El nombre de usuario es obligatorio")
        } else if self.email.is_empty() {
            Some("El email es obligatorio")
        } else if mode == FormMode::Create && self.password.is_empty() {
            Some("La contraseña es obligatoria para nuevos usuarios")
        } else if !is_blank_or_digits(&self.dni) {
            Some("El DNI debe ser numérico")
        } else if !is_blank_or_digits(&self.phone_number) {
            Some("El teléfono debe ser numérico")
        } else {
            None
        };

        match problem {
            Some(msg) => Err(SessionError::Validation(msg.to_string())),
            None => Ok(()),
        }
    }

    /// Request body; a blank password is left out when editing so the
    /// current one is kept
    pub fn payload(&self, mode: FormMode) -> Value {
        let mut body = Map::new();
        body.insert("username".into(), Value::from(self.username.as_str()));
        body.insert("first_name".into(), Value::from(self.first_name.as_str()));
        body.insert("last_name".into(), Value::from(self.last_name.as_str()));
        body.insert("email".into(), Value::from(self.email.as_str()));
        if let Ok(dni) = self.dni.parse::<u64>() {
            body.insert("dni".into(), Value::from(dni));
        }
        if let Ok(phone) = self.phone_number.parse::<u64>() {
            body.insert("phone_number".into(), Value::from(phone));
        }
        if !(mode == FormMode::Edit && self.password.is_empty()) {
            body.insert("password".into(), Value::from(self.password.as_str()));
        }
        Value::Object(body)
    }
}

fn is_blank_or_digits(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit())
}

/// Reduce a server error body to one displayable line.
///
/// Field-error maps (`{"email": ["Enter a valid email address."]}`) yield the
/// first field's first message; bare strings and lists are taken as-is.
pub fn flatten_field_errors(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(flatten_field_errors),
        Value::Object(map) => map.values().next().and_then(flatten_field_errors),
        _ => None,
    }
}

/// Trait for the user endpoint to allow mocking
pub trait UserResource {
    fn list(&self) -> SessionResult<Vec<UserRecord>>;
    fn get(&self, id: u64) -> SessionResult<UserRecord>;
    fn create(&self, draft: &UserDraft) -> SessionResult<UserRecord>;
    fn update(&self, id: u64, draft: &UserDraft) -> SessionResult<UserRecord>;
    fn delete(&self, id: u64) -> SessionResult<()>;
}

/// Opens a user resource client on behalf of a bearer token
pub trait UserApi {
    fn connect<'a>(&'a self, access_token: &str) -> Box<dyn UserResource + 'a>;
}

impl UserApi for ApiConfig {
    fn connect<'a>(&'a self, access_token: &str) -> Box<dyn UserResource + 'a> {
        Box::new(HttpUserClient::new(self, access_token))
    }
}

pub struct HttpUserClient {
    users_url: String,
    bearer: String,
    agent: ureq::Agent,
}

impl HttpUserClient {
    pub fn new(api: &ApiConfig, access_token: &str) -> Self {
        Self {
            users_url: format!("{}{}", api.base_url.trim_end_matches('/'), api.users_path),
            bearer: format!("Bearer {}", access_token),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(api.timeout_ms))
                .build(),
        }
    }

    fn item_url(&self, id: u64) -> String {
        format!("{}/{}/", self.users_url.trim_end_matches('/'), id)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        tracing::debug!(method, url, "user API request");
        self.agent
            .request(method, url)
            .set("Authorization", &self.bearer)
            .set("Accept", "application/json")
    }
}

fn map_response(resp: Result<ureq::Response, ureq::Error>) -> SessionResult<ureq::Response> {
    match resp {
        Ok(r) => Ok(r),
        Err(ureq::Error::Status(code @ (401 | 403), _)) => Err(SessionError::Authentication(
            format!("HTTP {}: bearer token rejected", code),
        )),
        Err(ureq::Error::Status(code @ 400..=499, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .as_ref()
                .and_then(flatten_field_errors)
                .unwrap_or_else(|| format!("HTTP {}", code));
            Err(SessionError::Api {
                status: code,
                message,
            })
        }
        Err(ureq::Error::Status(code, _)) => {
            Err(SessionError::Transport(format!("HTTP {}", code)))
        }
        Err(e) => Err(SessionError::Transport(format!("request failed: {}", e))),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(resp: ureq::Response) -> SessionResult<T> {
    resp.into_json::<T>()
        .map_err(|e| SessionError::Transport(format!("unreadable response: {}", e)))
}

impl UserResource for HttpUserClient {
    fn list(&self) -> SessionResult<Vec<UserRecord>> {
        let resp = map_response(self.request("GET", &self.users_url).call())?;
        read_json(resp)
    }

    fn get(&self, id: u64) -> SessionResult<UserRecord> {
        let resp = map_response(self.request("GET", &self.item_url(id)).call())?;
        read_json(resp)
    }

    fn create(&self, draft: &UserDraft) -> SessionResult<UserRecord> {
        let resp = map_response(
            self.request("POST", &self.users_url)
                .send_json(draft.payload(FormMode::Create)),
        )?;
        read_json(resp)
    }

    fn update(&self, id: u64, draft: &UserDraft) -> SessionResult<UserRecord> {
        // PATCH so an omitted password is left unchanged server-side
        let resp = map_response(
            self.request("PATCH", &self.item_url(id))
                .send_json(draft.payload(FormMode::Edit)),
        )?;
        read_json(resp)
    }

    fn delete(&self, id: u64) -> SessionResult<()> {
        map_response(self.request("DELETE", &self.item_url(id)).call())?;
        Ok(())
    }
}
