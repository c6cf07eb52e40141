// Maps dashboard errors onto HTTP responses
use crate::domain::error::DashboardError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(pub DashboardError);

impl From<DashboardError> for ApiError {
    fn from(error: DashboardError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DashboardError::Validation(_) | DashboardError::UnsupportedWidgetType(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DashboardError::NotFound { .. } => StatusCode::NOT_FOUND,
            DashboardError::Network(_) => StatusCode::BAD_GATEWAY,
            // Never raised past the fetcher; treated as a conflict if it ever is.
            DashboardError::StaleResponseDiscarded => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
