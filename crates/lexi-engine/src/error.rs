use lexi_core::errors::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model service error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("turn aborted")]
    Aborted,

    #[error("tool loop exceeded {0} rounds")]
    MaxRoundsExceeded(u32),

    #[error("structured output could not be parsed: {message}")]
    StructuredOutput { message: String, raw_text: String },

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Stable classification sent to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.error_kind(),
            Self::Aborted => "aborted",
            Self::MaxRoundsExceeded(_) => "max_rounds_exceeded",
            Self::StructuredOutput { .. } => "structured_output",
            Self::Internal(_) => "internal",
        }
    }
}
