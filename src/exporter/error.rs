use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

impl ExporterError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExporterError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExporterError::Encode(_) => "ENCODE_FAILED",
        }
    }
}

impl IntoResponse for ExporterError {
    fn into_response(self) -> axum::response::Response {
        tracing::error!(error = %self, "Metrics request failed");
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });

        (self.status_code(), Json(body)).into_response()
    }
}
