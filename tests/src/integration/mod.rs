//! # Integration Tests
//!
//! Every flow runs on the in-memory broker and the in-memory storage
//! engine, so no external service is needed.

pub mod ingestion;
pub mod recovery;

use std::time::Duration;

use serde_json::json;
use shared_types::{to_hex, Address, Hash};
use tokio::time::{sleep, timeout};

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(2), async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition never held: {what}");
}

/// A `MULTISIG_TRANSACTION_PROPOSED` message.
pub fn proposed_event(safe_tx_hash: &Hash, safe: &Address, nonce: u64) -> String {
    json!({
        "type": "MULTISIG_TRANSACTION_PROPOSED",
        "safeTxHash": to_hex(safe_tx_hash),
        "chainId": 1,
        "safe": to_hex(safe),
        "nonce": nonce,
        "to": to_hex(&Address::repeat_byte(0xbb)),
        "value": "123456",
        "data": "0x",
        "operation": 0,
        "safeTxGas": 0,
        "baseGas": 0,
        "gasPrice": "0",
        "signatures": format!("0x{}", "ab".repeat(65)),
        "origin": {"name": "Safe{Wallet}"},
    })
    .to_string()
}

/// An `EXECUTED_MULTISIG_TRANSACTION` message.
pub fn executed_event(safe_tx_hash: &Hash, tx_hash: &Hash, failed: bool) -> String {
    json!({
        "type": "EXECUTED_MULTISIG_TRANSACTION",
        "safeTxHash": to_hex(safe_tx_hash),
        "txHash": to_hex(tx_hash),
        "failed": failed,
    })
    .to_string()
}
