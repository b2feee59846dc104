use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tillpoint_core::{Entity, Money, ProductId, SaleId};
use tillpoint_inventory::{NewProduct, Product, ProductPatch};
use tillpoint_sales::{IdempotencyKey, Sale, SaleError, SaleRequest, SaleRequestItem};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    #[serde(default)]
    pub stock_quantity: i64,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(body: CreateProductRequest) -> Self {
        NewProduct {
            sku: body.sku,
            name: body.name,
            unit_price: body.unit_price,
            stock_quantity: body.stock_quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub unit_price: Option<Money>,
}

impl From<UpdateProductRequest> for ProductPatch {
    fn from(body: UpdateProductRequest) -> Self {
        ProductPatch {
            name: body.name,
            unit_price: body.unit_price,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleRequest {
    pub items: Vec<SaleItemRequest>,
    pub idempotency_key: Option<String>,
}

impl CreateSaleRequest {
    /// Parse ids and merge the body key with an `Idempotency-Key` header value.
    pub fn into_sale_request(self, header_key: Option<&str>) -> Result<SaleRequest, SaleError> {
        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let product_id: ProductId = item.product_id.parse().map_err(|_| {
                    SaleError::invalid_input(format!(
                        "item {idx} has malformed productId '{}'",
                        item.product_id
                    ))
                })?;
                Ok(SaleRequestItem::new(product_id, item.quantity))
            })
            .collect::<Result<Vec<_>, SaleError>>()?;

        let key = match (self.idempotency_key.as_deref(), header_key) {
            (Some(body), Some(header)) if body.trim() != header.trim() => {
                return Err(SaleError::invalid_input(
                    "idempotencyKey and Idempotency-Key header disagree",
                ));
            }
            (Some(raw), _) | (None, Some(raw)) => Some(IdempotencyKey::new(raw)?),
            (None, None) => None,
        };

        let request = SaleRequest::new(items);
        Ok(match key {
            Some(key) => request.with_idempotency_key(key),
            None => request,
        })
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub stock_quantity: i64,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        ProductResponse {
            id: product.id(),
            sku: product.sku().to_string(),
            name: product.name().to_string(),
            unit_price: product.unit_price(),
            stock_quantity: product.stock_quantity(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemResponse {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price_at_sale: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleResponse {
    pub sale_id: SaleId,
    pub created_at: DateTime<Utc>,
    pub total_amount: Money,
    pub line_items: Vec<LineItemResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl From<Sale> for SaleResponse {
    fn from(sale: Sale) -> Self {
        SaleResponse {
            sale_id: sale.id(),
            created_at: sale.created_at(),
            total_amount: sale.total_amount(),
            line_items: sale
                .line_items()
                .iter()
                .map(|line| LineItemResponse {
                    product_id: line.product_id(),
                    quantity: line.quantity(),
                    unit_price_at_sale: line.unit_price_at_sale(),
                })
                .collect(),
            idempotency_key: sale.idempotency_key().map(|k| k.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(key: Option<&str>) -> CreateSaleRequest {
        CreateSaleRequest {
            items: vec![SaleItemRequest {
                product_id: ProductId::new().to_string(),
                quantity: 1,
            }],
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn header_key_is_used_when_body_has_none() {
        let req = body(None).into_sale_request(Some("abc")).unwrap();
        assert_eq!(req.idempotency_key().map(|k| k.as_str()), Some("abc"));
    }

    #[test]
    fn conflicting_keys_are_rejected() {
        let err = body(Some("abc")).into_sale_request(Some("xyz")).unwrap_err();
        assert!(matches!(err, SaleError::InvalidInput(_)));
        assert!(body(Some("abc")).into_sale_request(Some(" abc ")).is_ok());
    }

    #[test]
    fn malformed_product_id_names_the_item() {
        let req = CreateSaleRequest {
            items: vec![SaleItemRequest {
                product_id: "P1".to_string(),
                quantity: 1,
            }],
            idempotency_key: None,
        };
        match req.into_sale_request(None).unwrap_err() {
            SaleError::InvalidInput(msg) => assert!(msg.starts_with("item 0")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
