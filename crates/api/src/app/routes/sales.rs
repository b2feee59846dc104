use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use tillpoint_core::SaleId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_sale).get(list_sales))
        .route("/:id", get(get_sale))
}

pub async fn create_sale(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::CreateSaleRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    let header_key = match headers.get(IDEMPOTENCY_KEY_HEADER).map(|v| v.to_str()) {
        Some(Ok(v)) => Some(v),
        Some(Err(_)) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_input",
                "Idempotency-Key header must be visible ASCII",
            );
        }
        None => None,
    };

    let request = match body.into_sale_request(header_key) {
        Ok(r) => r,
        Err(e) => return errors::sale_error_to_response(e),
    };

    match services.commit_sale(&request).await {
        Ok(sale) => (StatusCode::CREATED, Json(dto::SaleResponse::from(sale))).into_response(),
        Err(e) => errors::sale_error_to_response(e),
    }
}

pub async fn list_sales(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.list_sales().await {
        Ok(sales) => Json(
            sales
                .into_iter()
                .map(dto::SaleResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: SaleId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid sale id"),
    };

    match services.get_sale(id).await {
        Ok(Some(sale)) => Json(dto::SaleResponse::from(sale)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "sale_not_found",
            format!("sale {id} not found"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}
