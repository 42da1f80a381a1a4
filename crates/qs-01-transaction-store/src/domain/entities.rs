//! # Domain Entities
//!
//! The multisig transaction record and its mapping onto storage rows.
//!
//! Every column passes through a [`ColumnCodec`] in both directions, so a
//! record that exists in memory is always within its invariants and a
//! corrupted row surfaces as [`StoreError::Codec`] instead of a wrong value.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared_types::{
    Address, AddressCodec, BoolCodec, BytesCodec, CodecError, ColumnCodec, ColumnValue, Hash,
    HashCodec, JsonCodec, Nullable, TimestampCodec, Uint256Codec, U256, ZERO_ADDRESS,
};

use super::errors::StoreError;
use super::schema::{ColumnDef, ColumnKind, IndexColumn, IndexDef, Row, TableSchema};

// =============================================================================
// SAFE OPERATION
// =============================================================================

/// The kind of call a Safe executes. Stored as `SMALLINT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum SafeOperation {
    #[default]
    Call = 0,
    DelegateCall = 1,
    Create = 2,
    Create2 = 3,
}

impl SafeOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SafeOperation::Call => "CALL",
            SafeOperation::DelegateCall => "DELEGATE_CALL",
            SafeOperation::Create => "CREATE",
            SafeOperation::Create2 => "CREATE2",
        }
    }
}

impl From<SafeOperation> for i16 {
    fn from(op: SafeOperation) -> Self {
        op as i16
    }
}

impl TryFrom<i64> for SafeOperation {
    type Error = CodecError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SafeOperation::Call),
            1 => Ok(SafeOperation::DelegateCall),
            2 => Ok(SafeOperation::Create),
            3 => Ok(SafeOperation::Create2),
            other => Err(CodecError::Range {
                codec: OperationCodec::NAME,
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SafeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec for the `operation` column.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationCodec;

impl OperationCodec {
    pub const NAME: &'static str = "operation";
}

impl ColumnCodec for OperationCodec {
    type Value = SafeOperation;

    fn encode(&self, value: &SafeOperation) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Integer(i64::from(i16::from(*value))))
    }

    fn decode(&self, column: &ColumnValue) -> Result<SafeOperation, CodecError> {
        match column {
            ColumnValue::Integer(i) => SafeOperation::try_from(*i),
            other => Err(CodecError::Type {
                codec: Self::NAME,
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }
}

// =============================================================================
// MULTISIG TRANSACTION
// =============================================================================

/// Storage layout of [`MultisigTransaction`].
pub static MULTISIG_TRANSACTION: TableSchema = TableSchema {
    name: "multisig_transaction",
    columns: &[
        ColumnDef::required("safe_tx_hash", ColumnKind::Binary(Some(32))),
        ColumnDef::required("chain_id", ColumnKind::Uint256),
        ColumnDef::required("safe", ColumnKind::Binary(Some(20))).indexed(),
        ColumnDef::required("nonce", ColumnKind::Uint256).indexed(),
        ColumnDef::optional("proposer", ColumnKind::Binary(Some(20))),
        ColumnDef::optional("proposed_by_delegate", ColumnKind::Binary(Some(20))),
        ColumnDef::optional("to", ColumnKind::Binary(Some(20))).indexed(),
        ColumnDef::required("value", ColumnKind::Uint256),
        ColumnDef::optional("data", ColumnKind::Binary(None)),
        ColumnDef::required("operation", ColumnKind::SmallInt),
        ColumnDef::required("safe_tx_gas", ColumnKind::Uint256),
        ColumnDef::required("base_gas", ColumnKind::Uint256),
        ColumnDef::required("gas_price", ColumnKind::Uint256),
        ColumnDef::optional("gas_token", ColumnKind::Binary(Some(20))),
        ColumnDef::optional("refund_receiver", ColumnKind::Binary(Some(20))),
        ColumnDef::optional("signatures", ColumnKind::Binary(None)),
        ColumnDef::optional("failed", ColumnKind::Bool).indexed(),
        ColumnDef::required("origin", ColumnKind::Json),
        ColumnDef::optional("tx_hash", ColumnKind::Binary(Some(32))),
        ColumnDef::required("created", ColumnKind::Timestamp).indexed(),
        ColumnDef::required("modified", ColumnKind::Timestamp),
    ],
    primary_key: "safe_tx_hash",
    indexes: &[IndexDef {
        name: "ix__multisigtransaction_safe_sorted",
        columns: &[
            IndexColumn {
                name: "safe",
                descending: false,
            },
            IndexColumn {
                name: "nonce",
                descending: true,
            },
            IndexColumn {
                name: "created",
                descending: true,
            },
        ],
    }],
};

/// A Safe multisig transaction as proposed and, later, executed.
///
/// `safe_tx_hash` identifies the record and never changes; the only
/// lifecycle mutation is recording `tx_hash`/`failed` once execution is
/// observed.
#[derive(Debug, Clone, PartialEq)]
pub struct MultisigTransaction {
    pub safe_tx_hash: Hash,
    pub chain_id: U256,
    pub safe: Address,
    pub nonce: U256,
    pub proposer: Option<Address>,
    pub proposed_by_delegate: Option<Address>,
    /// `None` stands for the zero address.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Option<Vec<u8>>,
    pub operation: SafeOperation,
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Option<Address>,
    pub refund_receiver: Option<Address>,
    pub signatures: Option<Vec<u8>>,
    /// `None` until execution is observed.
    pub failed: Option<bool>,
    pub origin: Value,
    pub tx_hash: Option<Hash>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl MultisigTransaction {
    /// A `CALL` with zero value and gas; refine with the `with_*` setters.
    #[must_use]
    pub fn new(safe_tx_hash: Hash, chain_id: U256, safe: Address, nonce: U256) -> Self {
        let now = Utc::now();
        Self {
            safe_tx_hash,
            chain_id,
            safe,
            nonce,
            proposer: None,
            proposed_by_delegate: None,
            to: None,
            value: U256::zero(),
            data: None,
            operation: SafeOperation::Call,
            safe_tx_gas: U256::zero(),
            base_gas: U256::zero(),
            gas_price: U256::zero(),
            gas_token: None,
            refund_receiver: None,
            signatures: None,
            failed: None,
            origin: Value::Object(serde_json::Map::new()),
            tx_hash: None,
            created: now,
            modified: now,
        }
    }

    #[must_use]
    pub fn with_proposer(mut self, proposer: Address) -> Self {
        self.proposer = Some(proposer);
        self
    }

    #[must_use]
    pub fn with_proposed_by_delegate(mut self, delegate: Address) -> Self {
        self.proposed_by_delegate = Some(delegate);
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: SafeOperation) -> Self {
        self.operation = operation;
        self
    }

    #[must_use]
    pub fn with_gas(mut self, safe_tx_gas: U256, base_gas: U256, gas_price: U256) -> Self {
        self.safe_tx_gas = safe_tx_gas;
        self.base_gas = base_gas;
        self.gas_price = gas_price;
        self
    }

    #[must_use]
    pub fn with_gas_token(mut self, gas_token: Address) -> Self {
        self.gas_token = Some(gas_token);
        self
    }

    #[must_use]
    pub fn with_refund_receiver(mut self, refund_receiver: Address) -> Self {
        self.refund_receiver = Some(refund_receiver);
        self
    }

    #[must_use]
    pub fn with_signatures(mut self, signatures: Vec<u8>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Value) -> Self {
        self.origin = origin;
        self
    }

    /// Destination, with an absent `to` read as the zero address.
    #[must_use]
    pub fn to_or_zero(&self) -> Address {
        self.to.unwrap_or(ZERO_ADDRESS)
    }

    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.tx_hash.is_some()
    }

    /// Encode into a row aligned with [`MULTISIG_TRANSACTION`].
    pub fn to_row(&self) -> Result<Row, CodecError> {
        let hash = HashCodec::new();
        let address = Nullable(AddressCodec::new());
        let bytes = Nullable(BytesCodec);
        Ok(vec![
            hash.encode(&self.safe_tx_hash)?,
            Uint256Codec.encode(&self.chain_id)?,
            AddressCodec::new().encode(&self.safe)?,
            Uint256Codec.encode(&self.nonce)?,
            address.encode(&self.proposer)?,
            address.encode(&self.proposed_by_delegate)?,
            address.encode(&self.to)?,
            Uint256Codec.encode(&self.value)?,
            bytes.encode(&self.data)?,
            OperationCodec.encode(&self.operation)?,
            Uint256Codec.encode(&self.safe_tx_gas)?,
            Uint256Codec.encode(&self.base_gas)?,
            Uint256Codec.encode(&self.gas_price)?,
            address.encode(&self.gas_token)?,
            address.encode(&self.refund_receiver)?,
            bytes.encode(&self.signatures)?,
            Nullable(BoolCodec).encode(&self.failed)?,
            JsonCodec.encode(&self.origin)?,
            Nullable(hash).encode(&self.tx_hash)?,
            TimestampCodec.encode(&self.created)?,
            TimestampCodec.encode(&self.modified)?,
        ])
    }

    /// Decode a row read from storage, validating every column.
    pub fn from_row(row: &[ColumnValue]) -> Result<Self, StoreError> {
        let [
            safe_tx_hash,
            chain_id,
            safe,
            nonce,
            proposer,
            proposed_by_delegate,
            to,
            value,
            data,
            operation,
            safe_tx_gas,
            base_gas,
            gas_price,
            gas_token,
            refund_receiver,
            signatures,
            failed,
            origin,
            tx_hash,
            created,
            modified,
        ] = row
        else {
            return Err(StoreError::schema(format!(
                "row for {} has {} columns, expected {}",
                MULTISIG_TRANSACTION.name,
                row.len(),
                MULTISIG_TRANSACTION.columns.len()
            )));
        };

        let hash = HashCodec::new();
        let address = Nullable(AddressCodec::new());
        let bytes = Nullable(BytesCodec);
        Ok(Self {
            safe_tx_hash: hash.decode(safe_tx_hash)?,
            chain_id: Uint256Codec.decode(chain_id)?,
            safe: AddressCodec::new().decode(safe)?,
            nonce: Uint256Codec.decode(nonce)?,
            proposer: address.decode(proposer)?,
            proposed_by_delegate: address.decode(proposed_by_delegate)?,
            to: address.decode(to)?,
            value: Uint256Codec.decode(value)?,
            data: bytes.decode(data)?,
            operation: OperationCodec.decode(operation)?,
            safe_tx_gas: Uint256Codec.decode(safe_tx_gas)?,
            base_gas: Uint256Codec.decode(base_gas)?,
            gas_price: Uint256Codec.decode(gas_price)?,
            gas_token: address.decode(gas_token)?,
            refund_receiver: address.decode(refund_receiver)?,
            signatures: bytes.decode(signatures)?,
            failed: Nullable(BoolCodec).decode(failed)?,
            origin: JsonCodec.decode(origin)?,
            tx_hash: Nullable(hash).decode(tx_hash)?,
            created: TimestampCodec.decode(created)?,
            modified: TimestampCodec.decode(modified)?,
        })
    }
}
