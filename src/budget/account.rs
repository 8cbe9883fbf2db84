//! Per-node token accounting.
//!
//! # Invariants
//! - `consumed <= allocated` (enforced at all times)
//! - `consumed` only grows until the next `set_allocation` or `reset`
//! - `lifetime_consumed` never decreases

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::util::lock;

/// Token account owned by every tree node.
///
/// # Invariants
/// - `consumed <= allocated`
///
/// # Design for Provability
/// All mutations go through methods that enforce invariants.
/// Direct field access is prevented (fields are private).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    /// Tokens granted to this node (set by the allocator for leaves)
    allocated: u64,

    /// Tokens spent since the allocation was last set
    consumed: u64,

    /// Tokens spent over the account's whole life, across resets
    #[serde(default)]
    lifetime_consumed: u64,
}

impl TokenAccount {
    /// Create an account with the given allocation and nothing consumed.
    pub fn new(allocated: u64) -> Self {
        Self {
            allocated,
            consumed: 0,
            lifetime_consumed: 0,
        }
    }

    // Getters

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn lifetime_consumed(&self) -> u64 {
        self.lifetime_consumed
    }

    /// Tokens still available.
    ///
    /// # Property
    /// `remaining() == allocated - consumed`
    pub fn remaining(&self) -> u64 {
        self.allocated.saturating_sub(self.consumed)
    }

    /// Check if we can afford a given cost.
    pub fn can_afford(&self, cost: u64) -> bool {
        cost <= self.remaining()
    }

    // Mutations with invariant enforcement

    /// Consume tokens from the allocation.
    ///
    /// # Postcondition
    /// On `Ok`, `consumed` increases by `amount`. On `Err`, the account is unchanged.
    ///
    /// # Errors
    /// Returns `Err` if consuming would exceed the allocation. Never clamps.
    pub fn consume(&mut self, amount: u64) -> Result<(), BudgetError> {
        if !self.can_afford(amount) {
            return Err(BudgetError::InsufficientTokens {
                requested: amount,
                remaining: self.remaining(),
            });
        }

        self.consumed += amount;
        self.lifetime_consumed += amount;
        Ok(())
    }

    /// Replace the allocation, starting a fresh accounting period.
    ///
    /// # Postcondition
    /// `allocated == tokens && consumed == 0`
    pub fn set_allocation(&mut self, tokens: u64) {
        self.allocated = tokens;
        self.consumed = 0;
    }

    /// Clear consumption, keeping the allocation.
    pub fn reset(&mut self) {
        self.consumed = 0;
    }
}

impl Default for TokenAccount {
    /// Default account holds the per-node fallback budget of 1000 tokens.
    fn default() -> Self {
        Self::new(1000)
    }
}

/// A `TokenAccount` shared between concurrent requests to the same node.
#[derive(Debug, Default)]
pub struct SharedAccount {
    inner: Mutex<TokenAccount>,
}

impl SharedAccount {
    pub fn new(allocated: u64) -> Self {
        Self {
            inner: Mutex::new(TokenAccount::new(allocated)),
        }
    }

    /// Point-in-time copy of the account.
    pub fn snapshot(&self) -> TokenAccount {
        *lock(&self.inner)
    }

    pub fn remaining(&self) -> u64 {
        lock(&self.inner).remaining()
    }

    /// Atomically consume `amount`, or leave the account untouched.
    pub fn consume(&self, amount: u64) -> Result<(), BudgetError> {
        lock(&self.inner).consume(amount)
    }

    /// Reject early when even `amount` is no longer affordable.
    pub fn ensure_affordable(&self, amount: u64) -> Result<(), BudgetError> {
        let account = lock(&self.inner);
        if account.can_afford(amount) {
            Ok(())
        } else {
            Err(BudgetError::InsufficientTokens {
                requested: amount,
                remaining: account.remaining(),
            })
        }
    }

    pub fn set_allocation(&self, tokens: u64) {
        lock(&self.inner).set_allocation(tokens);
    }

    pub fn reset(&self) {
        lock(&self.inner).reset();
    }
}

/// Errors related to token accounting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("Insufficient tokens: requested {requested}, remaining {remaining}")]
    InsufficientTokens { requested: u64, remaining: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_invariants() {
        let mut account = TokenAccount::new(100);

        assert_eq!(account.remaining(), 100);
        assert_eq!(account.consumed(), 0);

        account.consume(30).unwrap();
        assert_eq!(account.remaining(), 70);
        assert_eq!(account.consumed(), 30);

        // Exactly the remainder is fine
        account.consume(70).unwrap();
        assert_eq!(account.remaining(), 0);

        // Can't over-consume
        assert!(account.consume(1).is_err());
    }

    #[test]
    fn test_rejected_consume_leaves_account_unchanged() {
        let mut account = TokenAccount::new(50);
        account.consume(20).unwrap();

        let err = account.consume(31).unwrap_err();
        assert_eq!(
            err,
            BudgetError::InsufficientTokens {
                requested: 31,
                remaining: 30
            }
        );
        assert_eq!(account.consumed(), 20);
        assert_eq!(account.allocated(), 50);
    }

    #[test]
    fn test_set_allocation_starts_new_period() {
        let mut account = TokenAccount::new(100);
        account.consume(90).unwrap();

        account.set_allocation(40);
        assert_eq!(account.allocated(), 40);
        assert_eq!(account.consumed(), 0);
    }

    #[test]
    fn test_reset_keeps_allocation() {
        let mut account = TokenAccount::new(100);
        account.consume(60).unwrap();
        account.reset();
        assert_eq!(account.allocated(), 100);
        assert_eq!(account.remaining(), 100);
    }

    #[test]
    fn test_lifetime_survives_resets() {
        let mut account = TokenAccount::new(100);
        account.consume(60).unwrap();
        account.reset();
        account.consume(10).unwrap();
        account.set_allocation(50);
        account.consume(5).unwrap();
        assert!(account.consume(46).is_err());

        assert_eq!(account.consumed(), 5);
        assert_eq!(account.lifetime_consumed(), 75);
    }

    #[test]
    fn test_shared_account_ensure_affordable() {
        let shared = SharedAccount::new(10);
        assert!(shared.ensure_affordable(10).is_ok());
        shared.consume(4).unwrap();
        assert!(shared.ensure_affordable(7).is_err());
        assert_eq!(shared.snapshot().consumed(), 4);
    }
}
