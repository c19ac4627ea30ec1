//! Response bodies shared by the handlers.

use serde::{Deserialize, Serialize};

/// Plain-text body for unmatched routes.
pub const ROUTE_NOT_FOUND: &str = "Route not found";

/// Plain-text body for unsupported methods on a known route.
pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";

/// JSON error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: error.into(),
        }
    }
}
