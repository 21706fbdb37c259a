use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL journal of session events.
///
/// Entries name the user and the outcome; they never carry passwords or
/// tokens.
pub struct AuditLog {
    pub path: PathBuf,
    run_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl AuditLog {
    pub fn open(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    /// The user is identified by the token's `user_id` claim; what was typed
    /// at the prompt is never recorded
    pub fn login_ok(&mut self, user_id: Option<u64>) -> Result<()> {
        self.log("login_ok", serde_json::json!({ "user_id": user_id }))
    }

    /// `kind` separates rejected credentials from an unreachable server
    pub fn login_failed(&mut self, kind: &str) -> Result<()> {
        self.log("login_failed", serde_json::json!({ "kind": kind }))
    }

    /// `cleared` is false when the stored tokens survived the logout
    pub fn logout(&mut self, user_id: Option<u64>, remote: &str, cleared: bool) -> Result<()> {
        self.log(
            "logout",
            serde_json::json!({ "user_id": user_id, "remote": remote, "cleared": cleared }),
        )
    }

    pub fn refresh(&mut self, ok: bool, kind: Option<&str>) -> Result<()> {
        self.log("refresh", serde_json::json!({ "ok": ok, "kind": kind }))
    }

    /// Record a change made to a user account
    pub fn user_change(&mut self, action: &str, target_id: u64) -> Result<()> {
        self.log(
            "user_change",
            serde_json::json!({ "action": action, "target_id": target_id }),
        )
    }
}
