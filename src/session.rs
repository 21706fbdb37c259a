//! Authentication state machine.
//!
//! A session is either anonymous or holds an access/refresh pair. Tokens are
//! only ever written after a complete, parsed response from the auth server,
//! and logout clears the store even when the server cannot be told about it. Mutating operations take `&mut self`, which is what keeps
//! transitions from interleaving.

use crate::auth_api::{AuthEndpoint, Credentials};
use crate::error::{SessionError, SessionResult};
use crate::identity::{self, IdentityClaims};
use crate::token_store::TokenStore;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticated => "authenticated",
        }
    }
}

/// What happened to the server-side half of a logout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLogout {
    Revoked,
    Failed,
    /// There was no session, so there was nothing to revoke
    Skipped,
}

impl RemoteLogout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revoked => "revoked",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Result of `SessionManager::logout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutReport {
    pub remote: RemoteLogout,
    /// False when the stored tokens could not be removed; the next start
    /// would restore them
    pub cleared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Tokens {
    access: String,
    refresh: String,
}

pub struct SessionManager<E, S> {
    endpoint: E,
    store: S,
    tokens: Option<Tokens>,
    // Advisory only; always derived from `tokens.access`
    claims: Option<IdentityClaims>,
}

impl<E: AuthEndpoint, S: TokenStore> SessionManager<E, S> {
    /// Restore whatever session the store holds.
    pub fn new(endpoint: E, store: S) -> Self {
        let tokens = match store.load() {
            Ok(stored) => match (stored.access, stored.refresh) {
                (Some(access), Some(refresh)) => Some(Tokens { access, refresh }),
                (None, None) => None,
                _ => {
                    tracing::warn!("stored session holds only one token, starting anonymous");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "could not read stored session, starting anonymous");
                None
            }
        };

        let claims = tokens.as_ref().and_then(|t| decode_best_effort(&t.access));

        let session = Self {
            endpoint,
            store,
            tokens,
            claims,
        };
        tracing::debug!(state = session.state().as_str(), "session restored");
        session
    }

    pub fn state(&self) -> SessionState {
        if self.tokens.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Bearer credential for authenticated API calls
    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access.as_str())
    }

    /// Claims decoded from the current access token, if it was decodable.
    ///
    /// These come from an unverified payload. Use them for display, never to
    /// decide what the user may access.
    pub fn claims(&self) -> Option<&IdentityClaims> {
        self.claims.as_ref()
    }

    pub fn current_claim(&self, name: &str) -> Option<&Value> {
        self.claims.as_ref()?.get(name)
    }

    /// Exchange credentials for a token pair and persist it.
    ///
    /// On any error the session is left exactly as it was.
    pub fn login(&mut self, username: &str, password: &str) -> SessionResult<()> {
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::Validation(
                "Por favor ingrese usuario y contraseña".to_string(),
            ));
        }

        let credentials = Credentials::new(username, password);
        let pair = match self.endpoint.obtain_token(&credentials) {
            Ok(pair) => pair,
            Err(e @ SessionError::Authentication(_)) => {
                tracing::warn!(error = %e, "login rejected by server");
                return Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, "login failed: auth server unavailable");
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&pair.access, &pair.refresh) {
            tracing::error!(error = %e, "could not persist issued tokens");
            return Err(SessionError::Storage(e));
        }

        self.claims = decode_best_effort(&pair.access);
        self.tokens = Some(Tokens {
            access: pair.access,
            refresh: pair.refresh,
        });
        tracing::info!(user_id = ?self.claims.as_ref().and_then(|c| c.user_id()), "logged in");
        Ok(())
    }

    /// End the session locally, telling the server first when possible.
    ///
    /// The local store is cleared whatever the server says.
    pub fn logout(&mut self) -> LogoutReport {
        let remote = match &self.tokens {
            Some(Tokens { access, refresh }) => match self.endpoint.logout(refresh, access) {
                Ok(()) => RemoteLogout::Revoked,
                Err(e) => {
                    tracing::warn!(error = %e, "server-side logout failed, clearing local session anyway");
                    RemoteLogout::Failed
                }
            },
            None => RemoteLogout::Skipped,
        };

        let cleared = match self.store.clear() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "could not clear stored tokens");
                false
            }
        };
        self.tokens = None;
        self.claims = None;
        tracing::info!(remote = remote.as_str(), cleared, "logged out");
        LogoutReport { remote, cleared }
    }

    /// Trade the stored refresh token for a new access token.
    ///
    /// Only ever called on request; nothing refreshes implicitly.
    pub fn refresh(&mut self) -> SessionResult<()> {
        let refresh = match self.tokens.as_ref().map(|t| t.refresh.clone()) {
            Some(refresh) => refresh,
            None => {
                return Err(SessionError::Validation(
                    "No hay una sesión que renovar".to_string(),
                ))
            }
        };

        let renewed = self.endpoint.refresh(&refresh).map_err(|e| {
            tracing::warn!(error = %e, "token refresh failed");
            e
        })?;
        let refresh = renewed.refresh.unwrap_or(refresh);

        if let Err(e) = self.store.save(&renewed.access, &refresh) {
            tracing::error!(error = %e, "could not persist refreshed tokens");
            return Err(SessionError::Storage(e));
        }

        self.claims = decode_best_effort(&renewed.access);
        self.tokens = Some(Tokens {
            access: renewed.access,
            refresh,
        });
        tracing::info!("access token refreshed");
        Ok(())
    }
}

fn decode_best_effort(access: &str) -> Option<IdentityClaims> {
    match identity::decode(access) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::warn!(error = %e, "access token payload unreadable, identity unavailable");
            None
        }
    }
}
