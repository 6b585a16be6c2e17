//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;

/// API-level error wrapping the order taxonomy.
///
/// The response body is `{"error": {"code", "message", "details"?}}` where
/// `code` is the stable wire code and `details` carries per-item shortfalls
/// for `INSUFFICIENT_INVENTORY`.
#[derive(Debug)]
pub struct ApiError(pub OrderError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            OrderError::Validation(_) => StatusCode::BAD_REQUEST,
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::InsufficientInventory { .. }
            | OrderError::InvalidTransition { .. }
            | OrderError::DuplicateEvent(_) => StatusCode::CONFLICT,
            OrderError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let mut body = serde_json::json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
            }
        });
        if let OrderError::InsufficientInventory { ref details } = self.0
            && let Ok(details) = serde_json::to_value(details)
        {
            body["error"]["details"] = details;
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::{InventoryShortfall, ProductId};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(OrderError::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(OrderError::NotFound(OrderId::new())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(OrderError::ServiceUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(OrderError::InsufficientInventory {
                details: vec![InventoryShortfall {
                    product_id: ProductId::new("p-1"),
                    requested: 2,
                    available: 0,
                }],
            })
            .status(),
            StatusCode::CONFLICT
        );
    }
}
