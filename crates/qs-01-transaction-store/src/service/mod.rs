//! # Multisig Transaction Service
//!
//! Implements [`MultisigTransactionApi`] on top of whatever session the
//! caller's scope resolves to. The service holds no connection of its own;
//! its only dependency is the clock used for `created`/`modified`.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use shared_types::{to_hex, Address, AddressCodec, ColumnCodec, Hash, HashCodec};
use tracing::{debug, info};

use crate::adapters::SystemTimeSource;
use crate::domain::entities::{MultisigTransaction, MULTISIG_TRANSACTION};
use crate::domain::errors::StoreError;
use crate::domain::schema::{OrderBy, Row};
use crate::ports::inbound::MultisigTransactionApi;
use crate::ports::outbound::TimeSource;
use crate::session::ScopeContext;

/// Newest nonce first, then newest proposal.
const SAFE_HISTORY_ORDER: [OrderBy; 2] = [OrderBy::desc("nonce"), OrderBy::desc("created")];

/// The multisig transaction store.
pub struct MultisigTransactionService<TS: TimeSource = SystemTimeSource> {
    time_source: TS,
}

impl MultisigTransactionService<SystemTimeSource> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_source(SystemTimeSource)
    }
}

impl Default for MultisigTransactionService<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TS: TimeSource> MultisigTransactionService<TS> {
    pub fn with_time_source(time_source: TS) -> Self {
        Self { time_source }
    }
}

fn decode_rows(rows: Vec<Row>) -> Result<Vec<MultisigTransaction>, StoreError> {
    rows.iter().map(|row| MultisigTransaction::from_row(row)).collect()
}

#[async_trait]
impl<TS: TimeSource> MultisigTransactionApi for MultisigTransactionService<TS> {
    async fn create(
        &self,
        scope: &ScopeContext,
        mut record: MultisigTransaction,
    ) -> Result<MultisigTransaction, StoreError> {
        let now = self.time_source.now();
        record.created = now;
        record.modified = now;
        let row = record.to_row()?;

        let session = scope.session().await?;
        session.insert(&MULTISIG_TRANSACTION, row).await?;
        session.commit().await?;
        info!(
            safe_tx_hash = %to_hex(&record.safe_tx_hash),
            safe = %to_hex(&record.safe),
            nonce = %record.nonce,
            "Stored multisig transaction"
        );
        Ok(record)
    }

    async fn update(
        &self,
        scope: &ScopeContext,
        mut record: MultisigTransaction,
    ) -> Result<MultisigTransaction, StoreError> {
        let session = scope.session().await?;
        let key = HashCodec::new().encode(&record.safe_tx_hash)?;
        let stored = session
            .fetch_by_key(&MULTISIG_TRANSACTION, &key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: MULTISIG_TRANSACTION.name,
                key: to_hex(&record.safe_tx_hash),
            })?;
        record.created = MultisigTransaction::from_row(&stored)?.created;
        record.modified = self.time_source.now();

        session
            .update(&MULTISIG_TRANSACTION, record.to_row()?)
            .await?;
        session.commit().await?;
        debug!(safe_tx_hash = %to_hex(&record.safe_tx_hash), "Updated multisig transaction");
        Ok(record)
    }

    async fn get_all(&self, scope: &ScopeContext) -> Result<Vec<MultisigTransaction>, StoreError> {
        let session = scope.session().await?;
        decode_rows(session.fetch_all(&MULTISIG_TRANSACTION).await?)
    }

    async fn get_by_key(
        &self,
        scope: &ScopeContext,
        safe_tx_hash: &Hash,
    ) -> Result<Option<MultisigTransaction>, StoreError> {
        let session = scope.session().await?;
        let key = HashCodec::new().encode(safe_tx_hash)?;
        session
            .fetch_by_key(&MULTISIG_TRANSACTION, &key)
            .await?
            .map(|row| MultisigTransaction::from_row(&row))
            .transpose()
    }

    async fn get_by_safe(
        &self,
        scope: &ScopeContext,
        safe: &Address,
    ) -> Result<Vec<MultisigTransaction>, StoreError> {
        let session = scope.session().await?;
        let value = AddressCodec::new().encode(safe)?;
        decode_rows(
            session
                .fetch_where(&MULTISIG_TRANSACTION, "safe", &value, &SAFE_HISTORY_ORDER)
                .await?,
        )
    }

    async fn mark_executed(
        &self,
        scope: &ScopeContext,
        safe_tx_hash: &Hash,
        tx_hash: Hash,
        failed: bool,
    ) -> Result<MultisigTransaction, StoreError> {
        let mut record =
            self.get_by_key(scope, safe_tx_hash)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    table: MULTISIG_TRANSACTION.name,
                    key: to_hex(safe_tx_hash),
                })?;
        record.tx_hash = Some(tx_hash);
        record.failed = Some(failed);
        let record = self.update(scope, record).await?;
        info!(
            safe_tx_hash = %to_hex(safe_tx_hash),
            tx_hash = %to_hex(&tx_hash),
            failed,
            "Marked multisig transaction executed"
        );
        Ok(record)
    }
}
