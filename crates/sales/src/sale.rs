use chrono::{DateTime, Utc};
use serde::Serialize;

use tillpoint_core::{DomainError, DomainResult, Entity, Money, ProductId, SaleId, ValueObject};

use crate::request::IdempotencyKey;

/// One product-and-quantity entry of a sale, with its price frozen at sale time.
///
/// `product_id` is a reference only: later catalog changes to the product do
/// not touch this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleLineItem {
    product_id: ProductId,
    quantity: i64,
    unit_price_at_sale: Money,
}

impl SaleLineItem {
    pub fn new(product_id: ProductId, quantity: i64, unit_price_at_sale: Money) -> DomainResult<Self> {
        if quantity < 1 {
            return Err(DomainError::validation("line quantity must be at least 1"));
        }
        Ok(Self {
            product_id,
            quantity,
            unit_price_at_sale,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price_at_sale(&self) -> Money {
        self.unit_price_at_sale
    }

    /// `quantity × unit_price_at_sale`.
    pub fn extended_price(&self) -> DomainResult<Money> {
        self.unit_price_at_sale.times(self.quantity)
    }
}

impl ValueObject for SaleLineItem {}

/// A committed checkout. Immutable: there is no API to change it after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sale {
    id: SaleId,
    created_at: DateTime<Utc>,
    total_amount: Money,
    line_items: Vec<SaleLineItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idempotency_key: Option<IdempotencyKey>,
}

impl Sale {
    /// Build a new sale; the total is computed from the lines.
    pub fn record(
        id: SaleId,
        created_at: DateTime<Utc>,
        line_items: Vec<SaleLineItem>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> DomainResult<Self> {
        if line_items.is_empty() {
            return Err(DomainError::invariant("a sale must have at least one line item"));
        }
        let total_amount = Self::sum_lines(&line_items)?;
        Ok(Self {
            id,
            created_at,
            total_amount,
            line_items,
            idempotency_key,
        })
    }

    /// Rebuild a stored sale, verifying the persisted total against its lines.
    pub fn from_parts(
        id: SaleId,
        created_at: DateTime<Utc>,
        total_amount: Money,
        line_items: Vec<SaleLineItem>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> DomainResult<Self> {
        let sale = Self::record(id, created_at, line_items, idempotency_key)?;
        if sale.total_amount != total_amount {
            return Err(DomainError::invariant(format!(
                "sale {id} stored total {total_amount} does not match its lines ({})",
                sale.total_amount
            )));
        }
        Ok(sale)
    }

    fn sum_lines(lines: &[SaleLineItem]) -> DomainResult<Money> {
        let extended = lines
            .iter()
            .map(SaleLineItem::extended_price)
            .collect::<DomainResult<Vec<_>>>()?;
        Money::total(extended)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn line_items(&self) -> &[SaleLineItem] {
        &self.line_items
    }

    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        self.idempotency_key.as_ref()
    }

    /// Whether this sale's lines are exactly the given `(product, quantity)` pairs, in order.
    pub fn matches_lines<I>(&self, requested: I) -> bool
    where
        I: IntoIterator<Item = (ProductId, i64)>,
    {
        let mut requested = requested.into_iter();
        let mut stored = self.line_items.iter();
        loop {
            match (stored.next(), requested.next()) {
                (None, None) => return true,
                (Some(line), Some((product_id, quantity))) => {
                    if line.product_id != product_id || line.quantity != quantity {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

impl Entity for Sale {
    type Id = SaleId;

    fn id(&self) -> SaleId {
        self.id
    }
}
