use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use tillpoint_core::{Entity, ProductId, SaleId, StockGuard};
use tillpoint_inventory::{NewProduct, Product, ProductPatch};
use tillpoint_sales::{IdempotencyKey, Sale};

use super::r#trait::{
    DecrementOutcome, InventoryStore, ProductCatalog, SaleLedger, SaleStore, StoreError,
    TransactionScope,
};

#[derive(Debug, Clone)]
struct Versioned {
    product: Product,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Versioned>,
    skus: HashMap<String, ProductId>,
    sales: HashMap<SaleId, Sale>,
    idempotency: HashMap<IdempotencyKey, SaleId>,
}

impl State {
    fn is_referenced(&self, id: ProductId) -> bool {
        self.sales
            .values()
            .any(|sale| sale.line_items().iter().any(|l| l.product_id() == id))
    }
}

/// In-memory store with optimistic, first-committer-wins transactions.
///
/// Intended for tests/dev. Every product carries a version; a scope remembers
/// the version it first read and commit fails if any of them moved.
#[derive(Debug, Clone, Default)]
pub struct InMemorySaleStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySaleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read(state: &RwLock<State>) -> Result<RwLockReadGuard<'_, State>, StoreError> {
    state
        .read()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write(state: &RwLock<State>) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
    state
        .write()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

/// Unit of work over [`InMemorySaleStore`].
///
/// Reads are repeatable per product; decrements and sales are staged privately
/// and become visible to others only through `commit`.
#[derive(Debug)]
pub struct InMemoryScope {
    state: Arc<RwLock<State>>,
    observed: HashMap<ProductId, Versioned>,
    staged: HashMap<ProductId, Product>,
    pending_sales: Vec<Sale>,
}

impl InMemoryScope {
    fn current(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(product) = self.staged.get(&id) {
            return Ok(Some(product.clone()));
        }
        if let Some(seen) = self.observed.get(&id) {
            return Ok(Some(seen.product.clone()));
        }
        let state = read(&self.state)?;
        let Some(versioned) = state.products.get(&id).cloned() else {
            return Ok(None);
        };
        drop(state);
        let product = versioned.product.clone();
        self.observed.insert(id, versioned);
        Ok(Some(product))
    }

    fn committed_version(&self, id: ProductId) -> Result<Option<u64>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.products.get(&id).map(|v| v.version))
    }
}

#[async_trait]
impl InventoryStore for InMemoryScope {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.current(id)
    }

    async fn lock_products(&mut self, _ids: &[ProductId]) -> Result<(), StoreError> {
        // Conflicts are detected at commit instead.
        Ok(())
    }

    async fn conditional_decrement(
        &mut self,
        id: ProductId,
        amount: i64,
        guard: StockGuard,
    ) -> Result<DecrementOutcome, StoreError> {
        let Some(current) = self.current(id)? else {
            return Err(StoreError::NotFound(format!("product {id}")));
        };

        let seen_version = self.observed.get(&id).map(|v| v.version);
        if self.committed_version(id)? != seen_version {
            return Ok(DecrementOutcome::Conflict);
        }

        match current.decremented(amount, guard) {
            Ok(next) => {
                let remaining = next.stock_quantity();
                self.staged.insert(id, next);
                Ok(DecrementOutcome::Applied { remaining })
            }
            Err(_) => Ok(DecrementOutcome::Conflict),
        }
    }
}

#[async_trait]
impl SaleLedger for InMemoryScope {
    async fn append_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        if let Some(key) = sale.idempotency_key() {
            if self
                .pending_sales
                .iter()
                .any(|s| s.idempotency_key() == Some(key))
            {
                return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        self.pending_sales.push(sale.clone());
        Ok(())
    }

    async fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Sale>, StoreError> {
        if let Some(sale) = self
            .pending_sales
            .iter()
            .find(|s| s.idempotency_key() == Some(key))
        {
            return Ok(Some(sale.clone()));
        }
        let state = read(&self.state)?;
        Ok(state
            .idempotency
            .get(key)
            .and_then(|sale_id| state.sales.get(sale_id))
            .cloned())
    }
}

#[async_trait]
impl TransactionScope for InMemoryScope {
    async fn commit(self) -> Result<(), StoreError> {
        let mut state = write(&self.state)?;

        // Validate everything before applying anything.
        for (id, seen) in &self.observed {
            match state.products.get(id) {
                Some(committed) if committed.version == seen.version => {}
                _ => return Err(StoreError::StockConflict(*id)),
            }
        }
        for (id, product) in &self.staged {
            if product.stock_quantity() < 0 {
                return Err(StoreError::Invariant(format!(
                    "product {id} stock would become {}",
                    product.stock_quantity()
                )));
            }
        }
        for sale in &self.pending_sales {
            if state.sales.contains_key(&sale.id()) {
                return Err(StoreError::Invariant(format!("sale {} already exists", sale.id())));
            }
            if let Some(key) = sale.idempotency_key() {
                if state.idempotency.contains_key(key) {
                    return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
                }
            }
        }

        for (id, product) in self.staged {
            if let Some(committed) = state.products.get_mut(&id) {
                committed.product = product;
                committed.version += 1;
            }
        }
        for sale in self.pending_sales {
            if let Some(key) = sale.idempotency_key() {
                state.idempotency.insert(key.clone(), sale.id());
            }
            debug!(sale_id = %sale.id(), "sale appended to ledger");
            state.sales.insert(sale.id(), sale);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl SaleStore for InMemorySaleStore {
    type Scope = InMemoryScope;

    async fn begin(&self) -> Result<Self::Scope, StoreError> {
        Ok(InMemoryScope {
            state: self.state.clone(),
            observed: HashMap::new(),
            staged: HashMap::new(),
            pending_sales: Vec::new(),
        })
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.sales.get(&id).cloned())
    }

    async fn list_sales(&self) -> Result<Vec<Sale>, StoreError> {
        let state = read(&self.state)?;
        let mut sales: Vec<Sale> = state.sales.values().cloned().collect();
        sales.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        Ok(sales)
    }
}

#[async_trait]
impl ProductCatalog for InMemorySaleStore {
    async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        let product = new.into_product(ProductId::new())?;

        let mut state = write(&self.state)?;
        if state.skus.contains_key(product.sku()) {
            return Err(StoreError::DuplicateSku(product.sku().to_string()));
        }
        state.skus.insert(product.sku().to_string(), product.id());
        state.products.insert(
            product.id(),
            Versioned {
                product: product.clone(),
                version: 1,
            },
        );
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let state = read(&self.state)?;
        Ok(state.products.get(&id).map(|v| v.product.clone()))
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, StoreError> {
        let mut state = write(&self.state)?;
        let entry = state
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        let next = entry.product.patched(patch)?;
        entry.product = next.clone();
        entry.version += 1;
        Ok(next)
    }

    async fn remove_product(&self, id: ProductId) -> Result<(), StoreError> {
        let mut state = write(&self.state)?;
        if !state.products.contains_key(&id) {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        if state.is_referenced(id) {
            return Err(StoreError::Referenced(id));
        }
        if let Some(removed) = state.products.remove(&id) {
            state.skus.remove(removed.product.sku());
        }
        Ok(())
    }
}
