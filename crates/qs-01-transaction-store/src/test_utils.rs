//! Record factories and test doubles shared by unit and integration tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use shared_types::{Address, Hash, U256};

use crate::domain::entities::{MultisigTransaction, SafeOperation};
use crate::ports::outbound::TimeSource;

/// Mainnet, Gnosis Chain, Polygon, Arbitrum One, Sepolia.
pub const COMMON_CHAIN_IDS: [u64; 5] = [1, 100, 137, 42_161, 11_155_111];

#[must_use]
pub fn random_hash() -> Hash {
    Hash::from(rand::thread_rng().gen::<[u8; 32]>())
}

#[must_use]
pub fn random_address() -> Address {
    Address::from(rand::thread_rng().gen::<[u8; 20]>())
}

/// A random but valid proposed transaction for `safe`.
#[must_use]
pub fn make_transaction(safe: Address, nonce: u64) -> MultisigTransaction {
    let mut rng = rand::thread_rng();
    let chain_id = COMMON_CHAIN_IDS[rng.gen_range(0..COMMON_CHAIN_IDS.len())];
    let data: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
    MultisigTransaction::new(random_hash(), U256::from(chain_id), safe, U256::from(nonce))
        .with_proposer(random_address())
        .with_to(random_address())
        .with_value(U256::from(rng.gen::<u64>()))
        .with_data(data)
        .with_operation(SafeOperation::Call)
        .with_gas(
            U256::from(rng.gen_range(0..100_000u64)),
            U256::from(rng.gen_range(0..100_000u64)),
            U256::from(rng.gen_range(0..1_000_000_000u64)),
        )
        .with_signatures(vec![0xab; 65])
        .with_origin(json!({"url": "https://safe.global", "name": "Safe{Wallet}"}))
}

/// A transaction for a random Safe.
#[must_use]
pub fn random_transaction() -> MultisigTransaction {
    make_transaction(random_address(), rand::thread_rng().gen_range(0..1_000))
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
