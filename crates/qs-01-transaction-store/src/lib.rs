//! # Multisig Transaction Store (qs-01)
//!
//! Persistence for Safe multisig transactions ingested from the event
//! stream, with one storage session per unit of work.
//!
//! ## Architecture
//!
//! ```text
//! handler ──run_in_scope──→ SessionManager ──open_session──→ StorageEngine
//!    │                           │                          (memory | postgres)
//!    └──ScopeContext──→ MultisigTransactionService ──rows──→ StorageSession
//!                               (codecs on every column)
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforced by |
//! |-----------|-------------|
//! | uint256 fields within `[0, 2^256 - 1]` | `Uint256Codec` on every read and write |
//! | addresses 20 bytes, hashes 32 bytes | `FixedBytesCodec` plus a `CHECK` constraint |
//! | `safe_tx_hash` unique and immutable | primary key; updates match on it |
//! | one session per scope | `SessionManager` registry |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Entity, table schema, errors
//! - `ports/` - Inbound API and outbound storage/clock traits
//! - `session/` - Scope registry and RAII guards
//! - `service/` - `MultisigTransactionService`
//! - `adapters/` - In-memory and PostgreSQL engines, system clock
//!
//! ## Usage
//!
//! ```ignore
//! use qs_01_transaction_store::{InMemoryEngine, MultisigTransactionApi, MultisigTransactionService, SessionManager};
//!
//! let manager = SessionManager::new(Arc::new(InMemoryEngine::new()));
//! let service = MultisigTransactionService::new();
//! let stored = manager
//!     .run_in_scope(|scope| async move { service.create(&scope, record).await })
//!     .await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{InMemoryEngine, SystemTimeSource};
#[cfg(feature = "postgres")]
pub use adapters::{PoolStrategy, PostgresConfig, PostgresEngine};
pub use domain::entities::{MultisigTransaction, OperationCodec, SafeOperation, MULTISIG_TRANSACTION};
pub use domain::errors::StoreError;
pub use domain::schema::{ColumnDef, ColumnKind, IndexColumn, IndexDef, OrderBy, Row, TableSchema};
pub use ports::inbound::MultisigTransactionApi;
pub use ports::outbound::{StorageEngine, StorageSession, TimeSource};
pub use service::MultisigTransactionService;
pub use session::{ScopeContext, ScopeGuard, ScopeId, SessionManager};
