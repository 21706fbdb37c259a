//! Durable storage for the access/refresh token pair.
//!
//! Both tokens live under fixed keys (`accessToken`, `refreshToken`) in a
//! small JSON document so a session survives process restarts.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Tokens as read back from a store
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredTokens {
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

/// Persistence for the two session tokens
pub trait TokenStore {
    fn save(&self, access: &str, refresh: &str) -> io::Result<()>;
    fn load(&self) -> io::Result<StoredTokens>;
    /// Removing an already empty store is not an error.
    fn clear(&self) -> io::Result<()>;
}

/// Token store backed by a JSON file
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<std::fs::File> {
    std::fs::File::create(path)
}

impl TokenStore for FileTokenStore {
    fn save(&self, access: &str, refresh: &str) -> io::Result<()> {
        let tokens = StoredTokens {
            access: Some(access.to_string()),
            refresh: Some(refresh.to_string()),
        };
        let json = serde_json::to_vec_pretty(&tokens)?;
        self.write_atomic(&json)
    }

    fn load(&self) -> io::Result<StoredTokens> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoredTokens::default()),
            Err(e) => return Err(e),
        };
        if content.trim().is_empty() {
            return Ok(StoredTokens::default());
        }
        let mut tokens: StoredTokens = serde_json::from_str(&content)?;
        // An empty slot is the same as no slot
        tokens.access = tokens.access.filter(|t| !t.is_empty());
        tokens.refresh = tokens.refresh.filter(|t| !t.is_empty());
        Ok(tokens)
    }

    fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-process token store
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: std::cell::RefCell<StoredTokens>,
}

#[cfg(test)]
impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        Self {
            tokens: std::cell::RefCell::new(StoredTokens {
                access: Some(access.to_string()),
                refresh: Some(refresh.to_string()),
            }),
        }
    }
}

#[cfg(test)]
impl TokenStore for MemoryTokenStore {
    fn save(&self, access: &str, refresh: &str) -> io::Result<()> {
        *self.tokens.borrow_mut() = StoredTokens {
            access: Some(access.to_string()),
            refresh: Some(refresh.to_string()),
        };
        Ok(())
    }

    fn load(&self) -> io::Result<StoredTokens> {
        Ok(self.tokens.borrow().clone())
    }

    fn clear(&self) -> io::Result<()> {
        *self.tokens.borrow_mut() = StoredTokens::default();
        Ok(())
    }
}

impl<T: TokenStore + ?Sized> TokenStore for &T {
    fn save(&self, access: &str, refresh: &str) -> io::Result<()> {
        (**self).save(access, refresh)
    }

    fn load(&self) -> io::Result<StoredTokens> {
        (**self).load()
    }

    fn clear(&self) -> io::Result<()> {
        (**self).clear()
    }
}
