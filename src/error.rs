use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx reply; `message` is whatever the server or the caller's
    /// fallback chain produced.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("Rejected frame: {0}")]
    Frame(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("City not found")]
    CityNotFound,

    #[error("No todo with id {id}")]
    UnknownTodo { id: String },

    #[error("A request for {id} is already in flight")]
    Busy { id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub(crate) fn server(status: reqwest::StatusCode, message: impl Into<String>) -> Self {
        AppError::Server {
            status: status.as_u16(),
            message: message.into(),
        }
    }
}
