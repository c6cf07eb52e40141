// Error taxonomy shared by every layer of the dashboard engine
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    /// Position/size out of bounds or an unrecognized config option.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A persistence or data-source call failed or timed out.
    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported widget type: {0}")]
    UnsupportedWidgetType(String),

    /// A response arrived for a request that was superseded or cancelled.
    /// Never surfaced to users.
    #[error("stale response discarded")]
    StaleResponseDiscarded,
}

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn dashboard_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "dashboard",
            id: id.to_string(),
        }
    }

    pub fn widget_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "widget",
            id: id.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;
