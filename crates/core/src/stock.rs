//! Conditional stock decrement expectations.

use crate::error::{DomainError, DomainResult};

/// Precondition a stock decrement must satisfy at write time.
///
/// The store checks the guard atomically with the write; a failed check is a
/// conflict and leaves the row untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StockGuard {
    /// Apply whenever current stock covers the amount (row already locked).
    AtLeast,
    /// Apply only if stock still equals the value read earlier in the same
    /// unit of work (optimistic compare-and-set).
    Unchanged(i64),
}

impl StockGuard {
    pub fn admits(self, current: i64, amount: i64) -> bool {
        let covered = current >= amount;
        match self {
            StockGuard::AtLeast => covered,
            StockGuard::Unchanged(expected) => covered && expected == current,
        }
    }

    pub fn check(self, current: i64, amount: i64) -> DomainResult<()> {
        if self.admits(current, amount) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "conditional decrement rejected (guard: {self:?}, current: {current}, amount: {amount})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_requires_enough_stock() {
        assert!(StockGuard::AtLeast.admits(5, 5));
        assert!(!StockGuard::AtLeast.admits(4, 5));
    }

    #[test]
    fn unchanged_rejects_moved_stock() {
        assert!(StockGuard::Unchanged(5).admits(5, 3));
        assert!(!StockGuard::Unchanged(5).admits(4, 3));
        assert!(StockGuard::Unchanged(2).check(2, 3).is_err());
    }
}
