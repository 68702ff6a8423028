use parley_gateway::StreamError;

/// Failure taxonomy shared by every support operation. The HTTP layer maps
/// each variant to one status code.
#[derive(Debug, thiserror::Error)]
pub enum SupportError {
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("rate limited, retry in {retry_after_ms} ms")]
    RateLimited { remaining: f64, retry_after_ms: u64 },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("could not allocate a unique ticket code")]
    TicketCodeExhausted,

    #[error("events unavailable")]
    EventsUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type SupportResult<T> = Result<T, SupportError>;

impl SupportError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<StreamError> for SupportError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::MissingConversationId => Self::invalid_input(err.to_string()),
            StreamError::Unavailable => Self::EventsUnavailable,
        }
    }
}
