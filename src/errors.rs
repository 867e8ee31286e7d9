use thiserror::Error;

/// Top-level client error.
/// All variants carry a human-readable message for display/logging; the
/// text shown inside the chat comes from [`AppError::user_message`].
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Option {index} is out of range (only {available} offered)")]
    OptionOutOfRange { index: usize, available: usize },

    #[error("Unknown tone '{value}'")]
    UnknownTone { value: String },

    // ── Turn errors ──────────────────────────────────────────────────────────
    #[error("A chat turn is already in flight")]
    TurnInFlight,

    #[error("Chat turn was aborted")]
    TurnAborted,

    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Backend unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Backend answered with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Stream interrupted: {message}")]
    StreamInterrupted { message: String },

    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Server reported an error: {message}")]
    Server { message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            AppError::Timeout { message: e.to_string() }
        } else if e.is_connect() {
            AppError::Unreachable { url, message: e.to_string() }
        } else if let Some(status) = e.status() {
            AppError::HttpStatus { status: status.as_u16() }
        } else if e.is_body() || e.is_decode() {
            AppError::StreamInterrupted { message: e.to_string() }
        } else if e.is_request() {
            AppError::Unreachable { url, message: e.to_string() }
        } else {
            AppError::Unexpected(e.to_string())
        }
    }
}

impl AppError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::OptionOutOfRange { .. }
                | AppError::UnknownTone { .. }
        )
    }

    /// Submission was refused before anything was sent or recorded.
    pub fn is_rejection(&self) -> bool {
        self.is_validation() || matches!(self, AppError::TurnInFlight)
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Unreachable { .. }
                | AppError::Timeout { .. }
                | AppError::HttpStatus { .. }
                | AppError::StreamInterrupted { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout { .. })
    }

    /// Fixed chat text for a failed turn.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Unreachable { .. } => {
                "❌ No puedo conectar con el backend. Asegurate de que esté corriendo en puerto 8000."
            }
            AppError::Timeout { .. } => {
                "⏱️ La consulta tardó demasiado. El backend puede estar ocupado."
            }
            AppError::TurnAborted => "⏹️ Consulta cancelada.",
            AppError::Server { .. } => "❌ El servidor no pudo completar la respuesta.",
            _ => "❌ Error al conectar con el servidor.",
        }
    }

    /// Short annotation appended after content that was already streamed.
    pub fn annotation(&self) -> String {
        match self {
            AppError::TurnAborted => "⏹️ _Consulta cancelada._".to_string(),
            AppError::Timeout { .. } => "⚠️ _Respuesta interrumpida: la consulta tardó demasiado._".to_string(),
            _ => "⚠️ _Respuesta interrumpida: se perdió la conexión con el servidor._".to_string(),
        }
    }
}
