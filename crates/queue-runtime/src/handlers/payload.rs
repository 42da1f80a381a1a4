//! Event payload decoding.
//!
//! Messages are JSON objects discriminated by `type`:
//!
//! ```json
//! {
//!   "type": "MULTISIG_TRANSACTION_PROPOSED",
//!   "safeTxHash": "0x…", "chainId": "1", "safe": "0x…", "nonce": 7,
//!   "to": "0x…", "value": "123456", "data": "0x", "operation": 0,
//!   "safeTxGas": 0, "baseGas": 0, "gasPrice": 0,
//!   "gasToken": null, "refundReceiver": null,
//!   "proposer": "0x…", "signatures": "0x…", "origin": {"name": "Safe{Wallet}"}
//! }
//! ```
//!
//! Numbers may be JSON integers or decimal strings; byte fields are hex.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use qs_01_transaction_store::{MultisigTransaction, SafeOperation};
use serde::Deserialize;
use serde_json::Value;
use shared_types::{Address, AddressCodec, ColumnValue, Hash, HashCodec, Uint256Codec, U256};

use super::events::EventError;

pub const PROPOSED_EVENT: &str = "MULTISIG_TRANSACTION_PROPOSED";
pub const EXECUTED_EVENT: &str = "EXECUTED_MULTISIG_TRANSACTION";

/// A decoded event message.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A new transaction was proposed to a Safe.
    Proposed(Box<MultisigTransaction>),
    /// A proposed transaction was mined.
    Executed {
        safe_tx_hash: Hash,
        tx_hash: Hash,
        failed: bool,
    },
    /// Any event type this service does not store.
    Other(String),
}

impl QueueEvent {
    /// Event type as it appears on the wire.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            QueueEvent::Proposed(_) => PROPOSED_EVENT,
            QueueEvent::Executed { .. } => EXECUTED_EVENT,
            QueueEvent::Other(event_type) => event_type,
        }
    }
}

impl FromStr for QueueEvent {
    type Err = EventError;

    fn from_str(message: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(message).map_err(|e| EventError::Malformed(e.to_string()))?;
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::Malformed("missing string field `type`".to_string()))?
            .to_string();

        match event_type.as_str() {
            PROPOSED_EVENT => {
                let payload: ProposedPayload = from_value(value)?;
                Ok(QueueEvent::Proposed(Box::new(payload.into_transaction()?)))
            }
            EXECUTED_EVENT => {
                let payload: ExecutedPayload = from_value(value)?;
                Ok(QueueEvent::Executed {
                    safe_tx_hash: hash("safeTxHash", &payload.safe_tx_hash)?,
                    tx_hash: hash("txHash", &payload.tx_hash)?,
                    failed: payload.failed,
                })
            }
            _ => Ok(QueueEvent::Other(event_type)),
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|e| EventError::Malformed(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposedPayload {
    safe_tx_hash: String,
    chain_id: Value,
    safe: String,
    nonce: Value,
    #[serde(default)]
    proposer: Option<String>,
    #[serde(default)]
    proposed_by_delegate: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    operation: Option<i64>,
    #[serde(default)]
    safe_tx_gas: Option<Value>,
    #[serde(default)]
    base_gas: Option<Value>,
    #[serde(default)]
    gas_price: Option<Value>,
    #[serde(default)]
    gas_token: Option<String>,
    #[serde(default)]
    refund_receiver: Option<String>,
    #[serde(default)]
    signatures: Option<String>,
    #[serde(default)]
    origin: Option<Value>,
}

impl ProposedPayload {
    fn into_transaction(self) -> Result<MultisigTransaction, EventError> {
        let mut tx = MultisigTransaction::new(
            hash("safeTxHash", &self.safe_tx_hash)?,
            uint256("chainId", &self.chain_id)?,
            address("safe", &self.safe)?,
            uint256("nonce", &self.nonce)?,
        );

        tx.proposer = optional_address("proposer", self.proposer.as_deref())?;
        tx.proposed_by_delegate =
            optional_address("proposedByDelegate", self.proposed_by_delegate.as_deref())?;
        tx.to = optional_address("to", self.to.as_deref())?;
        tx.gas_token = optional_address("gasToken", self.gas_token.as_deref())?;
        tx.refund_receiver = optional_address("refundReceiver", self.refund_receiver.as_deref())?;

        tx.value = optional_uint256("value", self.value.as_ref())?;
        tx.safe_tx_gas = optional_uint256("safeTxGas", self.safe_tx_gas.as_ref())?;
        tx.base_gas = optional_uint256("baseGas", self.base_gas.as_ref())?;
        tx.gas_price = optional_uint256("gasPrice", self.gas_price.as_ref())?;

        tx.data = hex_bytes("data", self.data.as_deref())?;
        tx.signatures = hex_bytes("signatures", self.signatures.as_deref())?;

        if let Some(operation) = self.operation {
            tx.operation = SafeOperation::try_from(operation).map_err(|source| {
                EventError::Codec {
                    field: "operation",
                    source,
                }
            })?;
        }

        if let Some(origin) = self.origin {
            tx.origin = origin_object(origin);
        }
        Ok(tx)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutedPayload {
    safe_tx_hash: String,
    tx_hash: String,
    #[serde(default)]
    failed: bool,
}

fn uint256(field: &'static str, value: &Value) -> Result<U256, EventError> {
    let column = match value {
        Value::String(text) => {
            ColumnValue::Numeric(BigDecimal::from_str(text.trim()).map_err(|e| {
                EventError::InvalidField {
                    field,
                    reason: format!("not a decimal number: {e}"),
                }
            })?)
        }
        other => ColumnValue::from_json(other),
    };
    Uint256Codec
        .coerce(&column)
        .map_err(|source| EventError::Codec { field, source })
}

fn optional_uint256(field: &'static str, value: Option<&Value>) -> Result<U256, EventError> {
    match value {
        None | Some(Value::Null) => Ok(U256::zero()),
        Some(value) => uint256(field, value),
    }
}

fn address(field: &'static str, text: &str) -> Result<Address, EventError> {
    AddressCodec::new()
        .from_hex(text)
        .map_err(|source| EventError::Codec { field, source })
}

fn optional_address(field: &'static str, text: Option<&str>) -> Result<Option<Address>, EventError> {
    text.map(|text| address(field, text)).transpose()
}

fn hash(field: &'static str, text: &str) -> Result<Hash, EventError> {
    HashCodec::new()
        .from_hex(text)
        .map_err(|source| EventError::Codec { field, source })
}

/// Hex bytes; `"0x"` and absent both mean no bytes.
fn hex_bytes(field: &'static str, text: Option<&str>) -> Result<Option<Vec<u8>>, EventError> {
    let Some(text) = text else {
        return Ok(None);
    };
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        return Ok(None);
    }
    hex::decode(digits)
        .map(Some)
        .map_err(|e| EventError::InvalidField {
            field,
            reason: e.to_string(),
        })
}

/// Origins arrive either as objects or as JSON encoded in a string.
fn origin_object(origin: Value) -> Value {
    match origin {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}
