use thiserror::Error;

/// Failures surfaced by the session layer and the user resource client.
///
/// `Display` carries the diagnostic detail meant for the log; the text shown
/// to the operator comes from [`SessionError::user_message`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Required local input was missing. Never reaches the network.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server rejected the credentials or the bearer token.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The server could not be reached, timed out, or answered unexpectedly.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The access token is not a decodable three-segment token.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Reading or writing the persisted tokens failed.
    #[error("token storage failed: {0}")]
    Storage(#[from] std::io::Error),

    /// The user endpoint refused a request with a field-level message.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Short message suitable for the screen.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Authentication(_) => "Credenciales inválidas".to_string(),
            Self::Transport(_) => {
                "No se pudo contactar al servidor. Intente nuevamente.".to_string()
            }
            Self::MalformedToken(_) => "La sesión actual no es legible".to_string(),
            Self::Storage(_) => "No se pudo guardar la sesión local".to_string(),
            Self::Api { message, .. } => message.clone(),
        }
    }

    /// Stable short name used in the audit journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authentication(_) => "authentication",
            Self::Transport(_) => "transport",
            Self::MalformedToken(_) => "malformed_token",
            Self::Storage(_) => "storage",
            Self::Api { .. } => "api",
        }
    }
}
