//! Sale transaction engine.
//!
//! Turns a cart into one durable [`Sale`] while decrementing stock, as a single
//! unit of work against a [`SaleStore`]:
//!
//! ```text
//! SaleRequest
//!   ↓
//! 1. Normalize (validate, apply duplicate policy)        -> InvalidInput
//!   ↓
//! 2. Open scope; replay if the idempotency key exists
//!   ↓
//! 3. (RowLocking) lock products in ascending id order
//!   ↓
//! 4. Per item (cart order): read, check stock            -> ProductNotFound / InsufficientStock
//!   ↓
//! 5. Guarded decrements in ascending id order            -> ConcurrencyConflict
//!   ↓
//! 6. Append sale with price snapshots                    (steps 2-6 bounded by commit_timeout)
//!   ↓
//! 7. Commit                                              -> CommitFailed
//! ```
//!
//! Every failure leaves inventory and ledger untouched: the scope is rolled
//! back (or dropped) before the error is returned. The engine never retries a
//! conflicting sale on its own.

use core::str::FromStr;
use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use tillpoint_core::{Entity, ProductId, SaleId, StockGuard};
use tillpoint_sales::{
    Cart, DuplicatePolicy, IdempotencyKey, Sale, SaleError, SaleLineItem, SaleRequest,
};

use crate::store::{
    DecrementOutcome, InventoryStore, SaleLedger, SaleStore, StoreError, TransactionScope,
};

pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How concurrent sales touching the same product are serialized.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Plain reads; each decrement is a compare-and-set against the stock read
    /// earlier in the same scope.
    #[default]
    Optimistic,
    /// Lock every product of the cart up front (ascending id order), then
    /// decrement with a plain sufficiency guard.
    RowLocking,
}

impl FromStr for IsolationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(IsolationStrategy::Optimistic),
            "row_locking" | "row-locking" => Ok(IsolationStrategy::RowLocking),
            other => Err(format!(
                "unknown isolation strategy '{other}' (expected 'optimistic' or 'row_locking')"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub duplicate_policy: DuplicatePolicy,
    pub isolation: IsolationStrategy,
    /// Upper bound for one whole unit of work, lookups and commit included.
    pub commit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            isolation: IsolationStrategy::default(),
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }
}

/// Why one attempt did not produce a sale.
#[derive(Debug)]
enum Failure {
    Rejected(SaleError),
    /// Another unit of work committed a sale under the same key first.
    KeyTaken(IdempotencyKey),
}

impl From<SaleError> for Failure {
    fn from(value: SaleError) -> Self {
        Failure::Rejected(value)
    }
}

impl From<StoreError> for Failure {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::StockConflict(product_id) => {
                Failure::Rejected(SaleError::ConcurrencyConflict(product_id))
            }
            StoreError::DuplicateIdempotencyKey(key) => Failure::KeyTaken(key),
            StoreError::Invariant(msg) => Failure::Rejected(SaleError::commit_failed(msg)),
            other => Failure::Rejected(SaleError::commit_failed(other.to_string())),
        }
    }
}

enum Staged {
    Recorded(Sale),
    Replayed(Sale),
}

/// Commits sales against a [`SaleStore`].
///
/// Cheap to share behind an `Arc`; holds no per-sale state.
#[derive(Debug, Clone)]
pub struct SaleEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S> SaleEngine<S>
where
    S: SaleStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Commit one sale, all or nothing.
    ///
    /// With an idempotency key, a repeated request returns the sale recorded
    /// the first time (without touching stock again) as long as the carts
    /// agree; a different cart under a used key is `InvalidInput`.
    ///
    /// `commit_timeout` bounds staging only. Once the scope starts committing
    /// the engine waits for the store's answer, so a reported failure always
    /// means nothing was written.
    #[instrument(
        skip(self, request),
        fields(
            item_count = request.items().len(),
            idempotent = request.idempotency_key().is_some(),
            isolation = ?self.config.isolation
        ),
        err(level = "warn")
    )]
    pub async fn commit_sale(&self, request: &SaleRequest) -> Result<Sale, SaleError> {
        let cart = request.normalize(self.config.duplicate_policy)?;

        let result = self.run(&cart).await;
        if let Err(SaleError::CommitFailed(reason)) = &result {
            error!(%reason, "sale could not be committed");
        }
        result
    }

    async fn run(&self, cart: &Cart) -> Result<Sale, SaleError> {
        match self.attempt(cart).await {
            Ok(sale) => Ok(sale),
            Err(Failure::KeyTaken(key)) => match self.replay(cart, &key).await? {
                Some(sale) => Ok(sale),
                None => Err(SaleError::commit_failed(format!(
                    "idempotency key '{key}' is taken but its sale is not visible"
                ))),
            },
            Err(Failure::Rejected(err)) => {
                // A keyed retry racing its own first attempt may fail on stock;
                // the first attempt's sale is the answer if it committed.
                if let Some(key) = cart.idempotency_key() {
                    if !matches!(err, SaleError::InvalidInput(_)) {
                        if let Some(sale) = self.replay(cart, key).await? {
                            return Ok(sale);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn attempt(&self, cart: &Cart) -> Result<Sale, Failure> {
        // Expiry drops the staging future and with it the open scope.
        let (scope, staged) =
            match tokio::time::timeout(self.config.commit_timeout, self.open_and_stage(cart)).await
            {
                Ok(staged) => staged?,
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.commit_timeout.as_millis() as u64,
                        "sale timed out before commit; unit of work abandoned"
                    );
                    return Err(SaleError::commit_failed(format!(
                        "sale was not staged within {} ms; nothing was committed",
                        self.config.commit_timeout.as_millis()
                    ))
                    .into());
                }
            };

        match staged {
            Staged::Recorded(sale) => {
                scope.commit().await?;
                info!(
                    sale_id = %sale.id(),
                    total_amount = %sale.total_amount(),
                    line_count = sale.line_items().len(),
                    "sale committed"
                );
                Ok(sale)
            }
            Staged::Replayed(sale) => {
                discard(scope).await;
                debug!(sale_id = %sale.id(), "idempotent replay");
                Ok(sale)
            }
        }
    }

    async fn open_and_stage(&self, cart: &Cart) -> Result<(S::Scope, Staged), Failure> {
        let mut scope = self.store.begin().await?;
        match self.stage(&mut scope, cart).await {
            Ok(staged) => Ok((scope, staged)),
            Err(failure) => {
                discard(scope).await;
                Err(failure)
            }
        }
    }

    async fn stage(&self, scope: &mut S::Scope, cart: &Cart) -> Result<Staged, Failure> {
        if let Some(key) = cart.idempotency_key() {
            if let Some(existing) = scope.find_by_idempotency_key(key).await? {
                ensure_same_cart(&existing, cart, key)?;
                return Ok(Staged::Replayed(existing));
            }
        }

        if self.config.isolation == IsolationStrategy::RowLocking {
            scope.lock_products(&cart.lock_order()).await?;
        }

        // Reads and checks run in cart order; `planned` tracks stock left
        // after earlier entries for the same product.
        let mut planned: HashMap<ProductId, i64> = HashMap::new();
        let mut decrements = Vec::with_capacity(cart.items().len());
        let mut lines = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let product = scope
                .get_product(item.product_id)
                .await?
                .ok_or(SaleError::ProductNotFound(item.product_id))?;

            let available = *planned
                .entry(item.product_id)
                .or_insert_with(|| product.stock_quantity());
            if item.quantity > available {
                return Err(SaleError::InsufficientStock {
                    product_id: item.product_id,
                    requested: item.quantity,
                    available,
                }
                .into());
            }
            planned.insert(item.product_id, available - item.quantity);

            let guard = match self.config.isolation {
                IsolationStrategy::Optimistic => StockGuard::Unchanged(available),
                IsolationStrategy::RowLocking => StockGuard::AtLeast,
            };
            decrements.push((item.product_id, item.quantity, guard));

            lines.push(
                SaleLineItem::new(item.product_id, item.quantity, product.unit_price())
                    .map_err(SaleError::from)?,
            );
        }

        // Writes take row locks, so they go in ascending id order whatever the
        // cart order was. The sort is stable: repeated entries keep their
        // relative order and their guards chain.
        decrements.sort_by_key(|(product_id, _, _)| *product_id);
        for (product_id, quantity, guard) in decrements {
            match scope.conditional_decrement(product_id, quantity, guard).await? {
                DecrementOutcome::Applied { remaining } => {
                    debug!(%product_id, remaining, "stock decremented");
                }
                DecrementOutcome::Conflict => {
                    return Err(SaleError::ConcurrencyConflict(product_id).into());
                }
            }
        }

        let sale = Sale::record(
            SaleId::new(),
            Utc::now(),
            lines,
            cart.idempotency_key().cloned(),
        )
        .map_err(SaleError::from)?;
        scope.append_sale(&sale).await?;

        Ok(Staged::Recorded(sale))
    }

    /// Look up the sale already recorded under `key`, outside any write.
    async fn replay(&self, cart: &Cart, key: &IdempotencyKey) -> Result<Option<Sale>, SaleError> {
        let mut scope = self.store.begin().await.map_err(commit_failed)?;
        let found = scope.find_by_idempotency_key(key).await;
        discard(scope).await;

        match found.map_err(commit_failed)? {
            Some(sale) => {
                ensure_same_cart(&sale, cart, key)?;
                debug!(sale_id = %sale.id(), "idempotent replay after lost race");
                Ok(Some(sale))
            }
            None => Ok(None),
        }
    }
}

fn ensure_same_cart(existing: &Sale, cart: &Cart, key: &IdempotencyKey) -> Result<(), SaleError> {
    let requested = cart.items().iter().map(|i| (i.product_id, i.quantity));
    if existing.matches_lines(requested) {
        Ok(())
    } else {
        Err(SaleError::invalid_input(format!(
            "idempotency key '{key}' was already used for a different cart"
        )))
    }
}

fn commit_failed(err: StoreError) -> SaleError {
    SaleError::commit_failed(err.to_string())
}

async fn discard<T: TransactionScope>(scope: T) {
    if let Err(err) = scope.rollback().await {
        warn!(error = %err, "rollback failed; scope dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_parses_from_config_strings() {
        assert_eq!(
            "row_locking".parse::<IsolationStrategy>(),
            Ok(IsolationStrategy::RowLocking)
        );
        assert_eq!(
            " Optimistic ".parse::<IsolationStrategy>(),
            Ok(IsolationStrategy::Optimistic)
        );
        assert!("serializable".parse::<IsolationStrategy>().is_err());
    }

    #[test]
    fn default_config_is_sequential_optimistic_five_seconds() {
        let config = EngineConfig::default();
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Sequential);
        assert_eq!(config.isolation, IsolationStrategy::Optimistic);
        assert_eq!(config.commit_timeout, Duration::from_secs(5));
    }

    #[test]
    fn store_conflicts_surface_as_concurrency_conflicts() {
        let product_id = tillpoint_core::ProductId::new();
        match Failure::from(StoreError::StockConflict(product_id)) {
            Failure::Rejected(SaleError::ConcurrencyConflict(id)) => assert_eq!(id, product_id),
            other => panic!("unexpected {other:?}"),
        }
        match Failure::from(StoreError::Backend("connection reset".into())) {
            Failure::Rejected(SaleError::CommitFailed(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
