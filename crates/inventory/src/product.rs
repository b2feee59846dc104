use serde::{Deserialize, Serialize};

use tillpoint_core::{DomainError, DomainResult, Entity, Money, ProductId, StockGuard};

const MAX_SKU_LEN: usize = 64;
const MAX_NAME_LEN: usize = 200;

/// A sellable product and its on-hand stock.
///
/// `stock_quantity` is never negative in any value of this type; every
/// constructor and transition checks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    unit_price: Money,
    stock_quantity: i64,
}

impl Product {
    /// Rebuild a product from stored fields.
    pub fn from_parts(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        unit_price: Money,
        stock_quantity: i64,
    ) -> DomainResult<Self> {
        if stock_quantity < 0 {
            return Err(DomainError::invariant(format!(
                "product {id} has negative stock ({stock_quantity})"
            )));
        }
        Ok(Self {
            id,
            sku: sku.into(),
            name: name.into(),
            unit_price,
            stock_quantity,
        })
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn stock_quantity(&self) -> i64 {
        self.stock_quantity
    }

    /// Stock after removing `amount` units, if the guard admits the current level.
    pub fn decremented(&self, amount: i64, guard: StockGuard) -> DomainResult<Product> {
        if amount <= 0 {
            return Err(DomainError::validation("decrement amount must be positive"));
        }
        guard.check(self.stock_quantity, amount)?;
        Ok(Product {
            stock_quantity: self.stock_quantity - amount,
            ..self.clone()
        })
    }

    /// Apply a catalog edit. Stock is not part of a patch.
    pub fn patched(&self, patch: &ProductPatch) -> DomainResult<Product> {
        patch.validate()?;
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(price) = patch.unit_price {
            next.unit_price = price;
        }
        Ok(next)
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}

/// Catalog input for creating a product with its opening stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub stock_quantity: i64,
}

impl NewProduct {
    /// Validate and assign an identifier.
    pub fn into_product(self, id: ProductId) -> DomainResult<Product> {
        let sku = self.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if sku.len() > MAX_SKU_LEN {
            return Err(DomainError::validation(format!(
                "sku cannot exceed {MAX_SKU_LEN} characters"
            )));
        }
        validate_name(&self.name)?;
        if self.stock_quantity < 0 {
            return Err(DomainError::validation("stock_quantity cannot be negative"));
        }
        Product::from_parts(
            id,
            sku,
            self.name.trim(),
            self.unit_price,
            self.stock_quantity,
        )
    }
}

/// Catalog edit. Only descriptive fields and price are editable; the sku is
/// immutable and stock moves only through sales.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub unit_price: Option<Money>,
}

impl ProductPatch {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if self.name.is_none() && self.unit_price.is_none() {
            return Err(DomainError::validation("patch must change at least one field"));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn widget(stock: i64) -> Product {
        NewProduct {
            sku: "WID-1".to_string(),
            name: "Widget".to_string(),
            unit_price: price("10.00"),
            stock_quantity: stock,
        }
        .into_product(ProductId::new())
        .unwrap()
    }

    #[test]
    fn new_product_trims_and_validates() {
        let product = NewProduct {
            sku: "  SKU-9 ".to_string(),
            name: " Pencil ".to_string(),
            unit_price: price("0.99"),
            stock_quantity: 0,
        }
        .into_product(ProductId::new())
        .unwrap();
        assert_eq!(product.sku(), "SKU-9");
        assert_eq!(product.name(), "Pencil");
    }

    #[test]
    fn new_product_rejects_blank_sku_and_negative_stock() {
        let base = NewProduct {
            sku: " ".to_string(),
            name: "Pencil".to_string(),
            unit_price: price("1.00"),
            stock_quantity: 1,
        };
        assert!(base.clone().into_product(ProductId::new()).is_err());

        let negative = NewProduct {
            sku: "P".to_string(),
            stock_quantity: -1,
            ..base
        };
        assert!(matches!(
            negative.into_product(ProductId::new()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn decrement_never_goes_below_zero() {
        let product = widget(2);
        let err = product.decremented(3, StockGuard::AtLeast).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let emptied = product.decremented(2, StockGuard::Unchanged(2)).unwrap();
        assert_eq!(emptied.stock_quantity(), 0);
        assert_eq!(product.stock_quantity(), 2);
    }

    #[test]
    fn decrement_with_stale_expectation_is_rejected() {
        let product = widget(5);
        assert!(product.decremented(1, StockGuard::Unchanged(6)).is_err());
    }

    #[test]
    fn patch_changes_price_but_not_stock_or_sku() {
        let product = widget(7);
        let patched = product
            .patched(&ProductPatch {
                name: None,
                unit_price: Some(price("12.50")),
            })
            .unwrap();
        assert_eq!(patched.unit_price(), price("12.50"));
        assert_eq!(patched.stock_quantity(), 7);
        assert_eq!(patched.sku(), product.sku());
        assert_eq!(patched.id(), product.id());
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(widget(1).patched(&ProductPatch::default()).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decrement_preserves_non_negative_stock(stock in 0i64..1_000, amount in 1i64..1_000) {
                let product = widget(stock);
                match product.decremented(amount, StockGuard::AtLeast) {
                    Ok(next) => {
                        prop_assert!(next.stock_quantity() >= 0);
                        prop_assert_eq!(next.stock_quantity(), stock - amount);
                    }
                    Err(_) => prop_assert!(amount > stock),
                }
            }
        }
    }
}
