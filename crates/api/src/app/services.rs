//! Infrastructure wiring: which store backs the engine and the catalog.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use tillpoint_core::{ProductId, SaleId};
use tillpoint_infra::store::{InMemorySaleStore, PostgresSaleStore, ProductCatalog, SaleStore, StoreError};
use tillpoint_infra::{EngineConfig, SaleEngine};
use tillpoint_inventory::{NewProduct, Product, ProductPatch};
use tillpoint_sales::{Sale, SaleError, SaleRequest};

use crate::config::AppConfig;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        engine: Arc<SaleEngine<InMemorySaleStore>>,
    },
    Persistent {
        engine: Arc<SaleEngine<PostgresSaleStore>>,
    },
}

/// Pick the backend from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory store (data is lost on exit)");
        return Ok(AppServices::in_memory(config.engine.clone()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;
    let store = PostgresSaleStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;

    tracing::info!(
        isolation = ?config.engine.isolation,
        duplicate_policy = ?config.engine.duplicate_policy,
        "using postgres store"
    );
    Ok(AppServices::Persistent {
        engine: Arc::new(SaleEngine::new(store, config.engine.clone())),
    })
}

impl AppServices {
    pub fn in_memory(config: EngineConfig) -> Self {
        AppServices::InMemory {
            engine: Arc::new(SaleEngine::new(InMemorySaleStore::new(), config)),
        }
    }

    pub async fn commit_sale(&self, request: &SaleRequest) -> Result<Sale, SaleError> {
        match self {
            AppServices::InMemory { engine } => engine.commit_sale(request).await,
            AppServices::Persistent { engine } => engine.commit_sale(request).await,
        }
    }

    pub async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        match self {
            AppServices::InMemory { engine } => engine.store().get_sale(id).await,
            AppServices::Persistent { engine } => engine.store().get_sale(id).await,
        }
    }

    pub async fn list_sales(&self) -> Result<Vec<Sale>, StoreError> {
        match self {
            AppServices::InMemory { engine } => engine.store().list_sales().await,
            AppServices::Persistent { engine } => engine.store().list_sales().await,
        }
    }

    pub async fn create_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        match self {
            AppServices::InMemory { engine } => engine.store().create_product(new).await,
            AppServices::Persistent { engine } => engine.store().create_product(new).await,
        }
    }

    pub async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        match self {
            AppServices::InMemory { engine } => {
                ProductCatalog::get_product(engine.store(), id).await
            }
            AppServices::Persistent { engine } => {
                ProductCatalog::get_product(engine.store(), id).await
            }
        }
    }

    pub async fn update_product(
        &self,
        id: ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, StoreError> {
        match self {
            AppServices::InMemory { engine } => engine.store().update_product(id, patch).await,
            AppServices::Persistent { engine } => engine.store().update_product(id, patch).await,
        }
    }

    pub async fn remove_product(&self, id: ProductId) -> Result<(), StoreError> {
        match self {
            AppServices::InMemory { engine } => engine.store().remove_product(id).await,
            AppServices::Persistent { engine } => engine.store().remove_product(id).await,
        }
    }
}
