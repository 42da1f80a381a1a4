//! # Inbound Ports (Driving Ports)
//!
//! The record API used by event handlers.

use async_trait::async_trait;
use shared_types::{Address, Hash};

use crate::domain::entities::MultisigTransaction;
use crate::domain::errors::StoreError;
use crate::session::ScopeContext;

/// Persistence API for multisig transactions.
///
/// Every operation runs against the session bound to `scope`; none of them
/// opens a session of its own. Writes commit before returning.
#[async_trait]
pub trait MultisigTransactionApi: Send + Sync {
    /// Insert a new record, stamping `created` and `modified`.
    ///
    /// ## Errors
    ///
    /// - `Conflict`: a record with this `safe_tx_hash` already exists
    async fn create(
        &self,
        scope: &ScopeContext,
        record: MultisigTransaction,
    ) -> Result<MultisigTransaction, StoreError>;

    /// Persist changes to an existing record, refreshing `modified`.
    ///
    /// ## Errors
    ///
    /// - `NotFound`: no record with this `safe_tx_hash`
    async fn update(
        &self,
        scope: &ScopeContext,
        record: MultisigTransaction,
    ) -> Result<MultisigTransaction, StoreError>;

    /// Every record, in no particular order.
    async fn get_all(&self, scope: &ScopeContext) -> Result<Vec<MultisigTransaction>, StoreError>;

    async fn get_by_key(
        &self,
        scope: &ScopeContext,
        safe_tx_hash: &Hash,
    ) -> Result<Option<MultisigTransaction>, StoreError>;

    /// A Safe's history, newest nonce first, ties broken by newest `created`.
    async fn get_by_safe(
        &self,
        scope: &ScopeContext,
        safe: &Address,
    ) -> Result<Vec<MultisigTransaction>, StoreError>;

    /// Record on-chain execution of a proposed transaction.
    ///
    /// ## Errors
    ///
    /// - `NotFound`: the transaction was never proposed
    async fn mark_executed(
        &self,
        scope: &ScopeContext,
        safe_tx_hash: &Hash,
        tx_hash: Hash,
        failed: bool,
    ) -> Result<MultisigTransaction, StoreError>;
}
