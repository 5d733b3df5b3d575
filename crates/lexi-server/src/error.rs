use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use lexi_engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::Gateway(_)) => StatusCode::BAD_GATEWAY,
            Self::Engine(EngineError::StructuredOutput { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Engine(e) => e.kind(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = match &self {
            Self::Engine(EngineError::StructuredOutput { message, raw_text }) => json!({
                "error": message,
                "raw_text": raw_text,
            }),
            _ => json!({ "error": self.to_string(), "kind": self.kind() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexi_core::errors::GatewayError;

    #[test]
    fn status_mapping() {
        assert_eq!(ServerError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServerError::from(EngineError::Gateway(GatewayError::ProviderOverloaded)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServerError::from(EngineError::MaxRoundsExceeded(10)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::from(EngineError::StructuredOutput {
                message: "bad".into(),
                raw_text: "nope".into(),
            })
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn kinds_follow_engine_errors() {
        assert_eq!(ServerError::BadRequest("x".into()).kind(), "bad_request");
        assert_eq!(ServerError::from(EngineError::Aborted).kind(), "aborted");
    }
}
