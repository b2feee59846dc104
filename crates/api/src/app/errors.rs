use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tillpoint_infra::store::StoreError;
use tillpoint_sales::SaleError;

pub fn sale_error_to_response(err: SaleError) -> axum::response::Response {
    let status = match &err {
        SaleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SaleError::ProductNotFound(_) => StatusCode::NOT_FOUND,
        SaleError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SaleError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        SaleError::CommitFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        StoreError::DuplicateSku(sku) => json_error(
            StatusCode::CONFLICT,
            "duplicate_sku",
            format!("sku already exists: {sku}"),
        ),
        e @ StoreError::Referenced(_) => {
            json_error(StatusCode::CONFLICT, "product_referenced", e.to_string())
        }
        e @ (StoreError::StockConflict(_) | StoreError::DuplicateIdempotencyKey(_)) => {
            json_error(StatusCode::CONFLICT, "conflict", e.to_string())
        }
        StoreError::Invariant(msg) => {
            tracing::error!(error = %msg, "storage invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "storage backend failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

/// Malformed or mistyped request bodies get the same JSON error shape as
/// every other failure.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_input", rejection.body_text())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillpoint_core::ProductId;

    #[test]
    fn sale_errors_map_to_distinct_statuses() {
        let id = ProductId::new();
        let cases = [
            (SaleError::invalid_input("empty"), StatusCode::BAD_REQUEST),
            (SaleError::ProductNotFound(id), StatusCode::NOT_FOUND),
            (
                SaleError::InsufficientStock {
                    product_id: id,
                    requested: 3,
                    available: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (SaleError::ConcurrencyConflict(id), StatusCode::CONFLICT),
            (SaleError::commit_failed("timeout"), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(sale_error_to_response(err).status(), status);
        }
    }
}
