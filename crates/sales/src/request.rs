//! Cart input and its normalization before the engine touches storage.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use tillpoint_core::ProductId;

use crate::error::SaleError;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// One requested cart entry. Ephemeral: consumed once by the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequestItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl SaleRequestItem {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Client-chosen token making a checkout safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(raw: impl Into<String>) -> Result<Self, SaleError> {
        let raw = raw.into();
        let key = raw.trim();
        if key.is_empty() {
            return Err(SaleError::invalid_input("idempotency key cannot be empty"));
        }
        if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(SaleError::invalid_input(format!(
                "idempotency key cannot exceed {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(SaleError::invalid_input(
                "idempotency key cannot contain control characters",
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = SaleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdempotencyKey::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How repeated entries for one product inside a single cart are treated.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Each entry is an independent decrement against the stock left by the
    /// entries before it, and gets its own line item.
    #[default]
    Sequential,
    /// Quantities are summed per product (first-appearance order) and checked
    /// against stock once; one line item per product.
    Merge,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(DuplicatePolicy::Sequential),
            "merge" => Ok(DuplicatePolicy::Merge),
            other => Err(format!(
                "unknown duplicate policy '{other}' (expected 'sequential' or 'merge')"
            )),
        }
    }
}

/// Checkout request as handed over by the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    items: Vec<SaleRequestItem>,
    idempotency_key: Option<IdempotencyKey>,
}

impl SaleRequest {
    pub fn new(items: Vec<SaleRequestItem>) -> Self {
        Self {
            items,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn items(&self) -> &[SaleRequestItem] {
        &self.items
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    /// Validate locally and apply the duplicate policy.
    pub fn normalize(&self, policy: DuplicatePolicy) -> Result<Cart, SaleError> {
        if self.items.is_empty() {
            return Err(SaleError::invalid_input("sale must contain at least one item"));
        }
        if let Some((idx, item)) = self
            .items
            .iter()
            .enumerate()
            .find(|(_, item)| item.quantity < 1)
        {
            return Err(SaleError::invalid_input(format!(
                "item {idx} (product {}) has quantity {}; quantity must be at least 1",
                item.product_id, item.quantity
            )));
        }

        let items = match policy {
            DuplicatePolicy::Sequential => self.items.clone(),
            DuplicatePolicy::Merge => merge_duplicates(&self.items)?,
        };

        Ok(Cart {
            items,
            idempotency_key: self.idempotency_key.clone(),
        })
    }
}

fn merge_duplicates(items: &[SaleRequestItem]) -> Result<Vec<SaleRequestItem>, SaleError> {
    let mut merged: Vec<SaleRequestItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or_else(|| {
                        SaleError::invalid_input(format!(
                            "combined quantity for product {} overflows",
                            item.product_id
                        ))
                    })?;
            }
            None => merged.push(*item),
        }
    }
    Ok(merged)
}

/// A validated, policy-normalized cart. Only obtainable via [`SaleRequest::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    items: Vec<SaleRequestItem>,
    idempotency_key: Option<IdempotencyKey>,
}

impl Cart {
    pub fn items(&self) -> &[SaleRequestItem] {
        &self.items
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    /// Distinct products in ascending id order (row-lock acquisition order).
    pub fn lock_order(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.items.iter().map(|i| i.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: ProductId, quantity: i64) -> SaleRequestItem {
        SaleRequestItem::new(product_id, quantity)
    }

    #[test]
    fn empty_cart_is_invalid() {
        let err = SaleRequest::new(vec![])
            .normalize(DuplicatePolicy::Sequential)
            .unwrap_err();
        assert!(matches!(err, SaleError::InvalidInput(_)));
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let p = ProductId::new();
        for qty in [0, -3] {
            let err = SaleRequest::new(vec![item(p, 1), item(p, qty)])
                .normalize(DuplicatePolicy::Merge)
                .unwrap_err();
            match err {
                SaleError::InvalidInput(msg) => assert!(msg.starts_with("item 1")),
                other => panic!("expected InvalidInput, got {other:?}"),
            }
        }
    }

    #[test]
    fn sequential_policy_keeps_entries_in_input_order() {
        let (a, b) = (ProductId::new(), ProductId::new());
        let cart = SaleRequest::new(vec![item(a, 2), item(b, 1), item(a, 3)])
            .normalize(DuplicatePolicy::Sequential)
            .unwrap();
        assert_eq!(cart.items(), &[item(a, 2), item(b, 1), item(a, 3)]);
    }

    #[test]
    fn merge_policy_sums_duplicates_in_first_appearance_order() {
        let (a, b) = (ProductId::new(), ProductId::new());
        let cart = SaleRequest::new(vec![item(b, 1), item(a, 2), item(b, 4)])
            .normalize(DuplicatePolicy::Merge)
            .unwrap();
        assert_eq!(cart.items(), &[item(b, 5), item(a, 2)]);
    }

    #[test]
    fn merge_overflow_is_rejected() {
        let a = ProductId::new();
        let err = SaleRequest::new(vec![item(a, i64::MAX), item(a, 1)])
            .normalize(DuplicatePolicy::Merge)
            .unwrap_err();
        assert!(matches!(err, SaleError::InvalidInput(_)));
    }

    #[test]
    fn lock_order_is_sorted_and_distinct() {
        let ids: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
        let cart = SaleRequest::new(vec![
            item(ids[3], 1),
            item(ids[0], 1),
            item(ids[3], 1),
            item(ids[2], 1),
        ])
        .normalize(DuplicatePolicy::Sequential)
        .unwrap();
        let mut expected = vec![ids[0], ids[2], ids[3]];
        expected.sort();
        assert_eq!(cart.lock_order(), expected);
    }

    #[test]
    fn idempotency_key_is_trimmed_and_bounded() {
        assert_eq!(IdempotencyKey::new("  abc-1 ").unwrap().as_str(), "abc-1");
        assert!(IdempotencyKey::new("   ").is_err());
        assert!(IdempotencyKey::new("a".repeat(129)).is_err());
        assert!(IdempotencyKey::new("a\nb").is_err());
    }

    #[test]
    fn idempotency_key_limit_counts_characters() {
        // 128 two-byte characters: 256 bytes, still within the limit.
        assert!(IdempotencyKey::new("é".repeat(128)).is_ok());
        assert!(IdempotencyKey::new("é".repeat(129)).is_err());
    }

    #[test]
    fn duplicate_policy_parses_from_config_strings() {
        assert_eq!("Merge".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Merge));
        assert_eq!(
            "sequential".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::Sequential)
        );
        assert!("both".parse::<DuplicatePolicy>().is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_preserves_total_quantity_per_product(
                picks in proptest::collection::vec((0usize..4, 1i64..50), 1..30)
            ) {
                let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
                let items: Vec<SaleRequestItem> = picks
                    .iter()
                    .map(|(p, q)| item(products[*p], *q))
                    .collect();
                let cart = SaleRequest::new(items.clone())
                    .normalize(DuplicatePolicy::Merge)
                    .unwrap();

                for product in &products {
                    let requested: i64 = items.iter().filter(|i| i.product_id == *product).map(|i| i.quantity).sum();
                    let merged: Vec<_> = cart.items().iter().filter(|i| i.product_id == *product).collect();
                    if requested == 0 {
                        prop_assert!(merged.is_empty());
                    } else {
                        prop_assert_eq!(merged.len(), 1);
                        prop_assert_eq!(merged[0].quantity, requested);
                    }
                }
            }
        }
    }
}
