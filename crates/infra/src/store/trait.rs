use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tillpoint_core::{DomainError, ProductId, SaleId, StockGuard};
use tillpoint_inventory::{NewProduct, Product, ProductPatch};
use tillpoint_sales::{IdempotencyKey, Sale};

/// Storage operation error.
///
/// These are **infrastructure errors** (conflicts, uniqueness, backend faults)
/// as opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The product's stock moved under a concurrent unit of work.
    #[error("stock conflict on product {0}")]
    StockConflict(ProductId),

    #[error("sku already exists: {0}")]
    DuplicateSku(String),

    #[error("idempotency key already used: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),

    /// A product still referenced by recorded sales cannot be removed.
    #[error("product {0} is referenced by recorded sales")]
    Referenced(ProductId),

    #[error("not found: {0}")]
    NotFound(String),

    /// Catalog input rejected by domain validation.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A storage-level integrity check tripped (e.g. stock would go negative).
    #[error("storage invariant violated: {0}")]
    Invariant(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => StoreError::Invalid(msg),
            DomainError::InvariantViolation(msg) => StoreError::Invariant(msg),
        }
    }
}

/// Result of a guarded stock decrement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecrementOutcome {
    Applied { remaining: i64 },
    /// The guard did not hold at write time; nothing was changed.
    Conflict,
}

/// Product reads and the one stock-mutating primitive, scoped to a unit of work.
#[async_trait]
pub trait InventoryStore: Send {
    /// Point read at the scope's isolation level. Sees the scope's own decrements.
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Take exclusive row locks on `ids` in ascending order.
    ///
    /// Backends that detect conflicts optimistically may treat this as a no-op.
    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<(), StoreError>;

    /// Decrement stock by `amount` only if `guard` admits the current level.
    async fn conditional_decrement(
        &mut self,
        id: ProductId,
        amount: i64,
        guard: StockGuard,
    ) -> Result<DecrementOutcome, StoreError>;
}

/// Append-only sale ledger, scoped to the same unit of work as the stock writes.
#[async_trait]
pub trait SaleLedger: Send {
    async fn append_sale(&mut self, sale: &Sale) -> Result<(), StoreError>;

    async fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Sale>, StoreError>;
}

/// One transactional unit of work over inventory and ledger.
///
/// `commit` and `rollback` are the only terminal operations. Dropping a scope
/// without committing discards everything it staged.
#[async_trait]
pub trait TransactionScope: InventoryStore + SaleLedger {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Entry point for the sale engine and the ledger read paths.
#[async_trait]
pub trait SaleStore: Send + Sync {
    type Scope: TransactionScope + 'static;

    /// Open a new transactional scope.
    async fn begin(&self) -> Result<Self::Scope, StoreError>;

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError>;

    /// All sales, newest first (ties broken by id, descending).
    async fn list_sales(&self) -> Result<Vec<Sale>, StoreError>;
}

/// Catalog management. Never changes stock of an existing product.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn update_product(&self, id: ProductId, patch: &ProductPatch)
        -> Result<Product, StoreError>;

    async fn remove_product(&self, id: ProductId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> SaleStore for Arc<S>
where
    S: SaleStore + ?Sized,
{
    type Scope = S::Scope;

    async fn begin(&self) -> Result<Self::Scope, StoreError> {
        (**self).begin().await
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        (**self).get_sale(id).await
    }

    async fn list_sales(&self) -> Result<Vec<Sale>, StoreError> {
        (**self).list_sales().await
    }
}

#[async_trait]
impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        (**self).create_product(new).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id).await
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, StoreError> {
        (**self).update_product(id, patch).await
    }

    async fn remove_product(&self, id: ProductId) -> Result<(), StoreError> {
        (**self).remove_product(id).await
    }
}
