use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Remote API location and endpoint paths
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_users_path")]
    pub users_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_token_path() -> String {
    "/api/token/".to_string()
}
fn default_refresh_path() -> String {
    "/api/token/refresh/".to_string()
}
fn default_logout_path() -> String {
    "/api/logout/".to_string()
}
fn default_users_path() -> String {
    "/api/users/".to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_path: default_token_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            users_path: default_users_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Where the session tokens are kept
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Session event journal
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// A config layer as written on disk: every field optional so a layer only
/// overrides what it names
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    #[serde(default)]
    api: ApiLayer,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    audit: AuditLayer,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiLayer {
    base_url: Option<String>,
    token_path: Option<String>,
    refresh_path: Option<String>,
    logout_path: Option<String>,
    users_path: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AuditLayer {
    enabled: Option<bool>,
    file: Option<PathBuf>,
}

/// Directory holding user-level state: ~/.useradmin
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".useradmin"))
}

/// Expand a leading `~/` against the home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.useradmin/config.local.toml) > project (.useradmin/config.toml)
    /// > user (~/.useradmin/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = home_dir() {
            let user_config = dir.join("config.toml");
            if user_config.exists() {
                config.merge_file(&user_config)?;
            }
        }

        let project_config = Path::new(".useradmin").join("config.toml");
        if project_config.exists() {
            config.merge_file(&project_config)?;
        }

        let local_config = Path::new(".useradmin").join("config.local.toml");
        if local_config.exists() {
            config.merge_file(&local_config)?;
        }

        Ok(config)
    }

    /// Merge a TOML file into this config (file takes priority)
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let layer: ConfigLayer = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        self.merge(layer);
        Ok(())
    }

    fn merge(&mut self, other: ConfigLayer) {
        let api = other.api;
        if let Some(v) = api.base_url {
            self.api.base_url = v;
        }
        if let Some(v) = api.token_path {
            self.api.token_path = v;
        }
        if let Some(v) = api.refresh_path {
            self.api.refresh_path = v;
        }
        if let Some(v) = api.logout_path {
            self.api.logout_path = v;
        }
        if let Some(v) = api.users_path {
            self.api.users_path = v;
        }
        if let Some(v) = api.timeout_ms {
            self.api.timeout_ms = v;
        }

        if other.session.file.is_some() {
            self.session.file = other.session.file;
        }

        if let Some(v) = other.audit.enabled {
            self.audit.enabled = v;
        }
        if other.audit.file.is_some() {
            self.audit.file = other.audit.file;
        }
    }

    /// Path of the token file, defaulting to ~/.useradmin/session.json
    pub fn session_file(&self) -> Option<PathBuf> {
        match &self.session.file {
            Some(path) => Some(expand_tilde(path)),
            None => home_dir().map(|dir| dir.join("session.json")),
        }
    }

    /// Path of the audit journal, or None when disabled
    pub fn audit_file(&self) -> Option<PathBuf> {
        if !self.audit.enabled {
            return None;
        }
        match &self.audit.file {
            Some(path) => Some(expand_tilde(path)),
            None => home_dir().map(|dir| dir.join("audit.jsonl")),
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base = &self.api.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Must start with http:// or https://, got '{}'", base),
            });
        }

        let paths = [
            ("api.token_path", &self.api.token_path),
            ("api.refresh_path", &self.api.refresh_path),
            ("api.logout_path", &self.api.logout_path),
            ("api.users_path", &self.api.users_path),
        ];
        for (field, path) in paths {
            if !path.starts_with('/') {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!("Must start with '/', got '{}'", path),
                });
            }
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Defaults plus a single file, without the user and project layers
    fn load_only(path: &Path) -> Result<Config> {
        let mut config = Config::default();
        config.merge_file(path)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.token_path, "/api/token/");
        assert_eq!(config.api.logout_path, "/api/logout/");
        assert_eq!(config.api.timeout_ms, 10_000);
        assert!(config.audit.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_only_named_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[api]
base_url = "https://admin.example.com"
timeout_ms = 3000

[audit]
enabled = false
"#,
        )
        .unwrap();

        let config = load_only(&path).unwrap();
        assert_eq!(config.api.base_url, "https://admin.example.com");
        assert_eq!(config.api.timeout_ms, 3000);
        assert_eq!(config.api.users_path, "/api/users/");
        assert!(!config.audit.enabled);
        assert!(config.audit_file().is_none());
    }

    #[test]
    fn test_later_layer_wins() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        fs::write(&first, "[api]\nbase_url = \"http://one\"\nusers_path = \"/v1/users/\"\n").unwrap();
        fs::write(&second, "[api]\nbase_url = \"http://two\"\n").unwrap();

        let mut config = Config::default();
        config.merge_file(&first).unwrap();
        config.merge_file(&second).unwrap();
        assert_eq!(config.api.base_url, "http://two");
        assert_eq!(config.api.users_path, "/v1/users/");
    }

    #[test]
    fn test_explicit_session_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[session]\nfile = \"/tmp/ua/session.json\"\n").unwrap();

        let config = load_only(&path).unwrap();
        assert_eq!(
            config.session_file(),
            Some(PathBuf::from("/tmp/ua/session.json"))
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[api\nbase_url = ").unwrap();
        assert!(load_only(&path).is_err());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = Config::default();
        config.api.base_url = "localhost:8000".to_string();
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "api.base_url");
    }

    #[test]
    fn test_validate_paths_and_timeout() {
        let mut config = Config::default();
        config.api.users_path = "api/users/".to_string();
        config.api.timeout_ms = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "api.users_path"));
        assert!(errors.iter().any(|e| e.message.contains("greater than 0")));
    }
}
