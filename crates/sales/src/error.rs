//! Failure taxonomy for committing a sale.

use thiserror::Error;

use tillpoint_core::{DomainError, ProductId};

/// Every way `commit_sale` can fail. Any of these means nothing was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SaleError {
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// Stock moved between read and conditional write. The caller may resubmit.
    #[error("concurrent update detected on product {0}")]
    ConcurrencyConflict(ProductId),

    /// Storage could not durably apply the transaction.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Rejected before any storage access.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SaleError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn commit_failed(msg: impl Into<String>) -> Self {
        Self::CommitFailed(msg.into())
    }

    /// Whether resubmitting the same cart could succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaleError::ConcurrencyConflict(_) | SaleError::CommitFailed(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            SaleError::ProductNotFound(_) => "product_not_found",
            SaleError::InsufficientStock { .. } => "insufficient_stock",
            SaleError::ConcurrencyConflict(_) => "concurrency_conflict",
            SaleError::CommitFailed(_) => "commit_failed",
            SaleError::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<DomainError> for SaleError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                SaleError::InvalidInput(msg)
            }
            DomainError::InvariantViolation(msg) => SaleError::CommitFailed(msg),
        }
    }
}
