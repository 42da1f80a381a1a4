//! # Codec Benchmarks
//!
//! Every stored value crosses a codec twice (write and read back), so codec
//! cost bounds ingestion throughput.
//!
//! | Codec | Path |
//! |-------|------|
//! | `Uint256Codec` | `U256` ⇄ `NUMERIC(78, 0)` |
//! | `AddressCodec` | hex string / bytes → `H160` |
//! | `MultisigTransaction` | full row encode and decode |
//! | `QueueEvent` | JSON message → domain record |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::time::Duration;

use qs_01_transaction_store::test_utils::{random_address, random_hash, random_transaction};
use qs_01_transaction_store::MultisigTransaction;
use queue_runtime::QueueEvent;
use shared_types::{to_hex, AddressCodec, ColumnCodec, ColumnValue, Uint256Codec, U256};

fn bench_uint256(c: &mut Criterion) {
    let mut group = c.benchmark_group("uint256-codec");
    group.measurement_time(Duration::from_secs(5));

    let mut rng = rand::thread_rng();
    let values: Vec<U256> = (0..1_000)
        .map(|_| U256::from_big_endian(&rng.gen::<[u8; 32]>()))
        .collect();
    let encoded: Vec<ColumnValue> = values
        .iter()
        .map(|v| Uint256Codec.encode(v).expect("in range"))
        .collect();

    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| {
            for value in &values {
                black_box(Uint256Codec.encode(value).is_ok());
            }
        })
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            for column in &encoded {
                black_box(Uint256Codec.decode(column).is_ok());
            }
        })
    });
    group.finish();
}

fn bench_address_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("address-codec");
    let codec = AddressCodec::new();
    let address = random_address();
    let hex_input = ColumnValue::Text(to_hex(&address));
    let bytes_input = ColumnValue::Bytes(address.as_bytes().to_vec());

    group.bench_function("coerce_hex", |b| {
        b.iter(|| black_box(codec.coerce(&hex_input).is_ok()))
    });
    group.bench_function("coerce_bytes", |b| {
        b.iter(|| black_box(codec.coerce(&bytes_input).is_ok()))
    });
    group.finish();
}

fn bench_row_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("multisig-transaction-row");

    for size in [1, 100, 1_000] {
        let records: Vec<MultisigTransaction> = (0..size).map(|_| random_transaction()).collect();
        let rows: Vec<_> = records
            .iter()
            .map(|r| r.to_row().expect("valid record"))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("to_row", size), &records, |b, records| {
            b.iter(|| {
                for record in records {
                    black_box(record.to_row().is_ok());
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("from_row", size), &rows, |b, rows| {
            b.iter(|| {
                for row in rows {
                    black_box(MultisigTransaction::from_row(row).is_ok());
                }
            })
        });
    }
    group.finish();
}

fn bench_event_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("event-decoding");
    let message = serde_json::json!({
        "type": "MULTISIG_TRANSACTION_PROPOSED",
        "safeTxHash": to_hex(&random_hash()),
        "chainId": "1",
        "safe": to_hex(&random_address()),
        "nonce": 42,
        "to": to_hex(&random_address()),
        "value": "1000000000000000000",
        "data": format!("0x{}", "ab".repeat(256)),
        "operation": 0,
        "safeTxGas": 0,
        "baseGas": 0,
        "gasPrice": "0",
        "signatures": format!("0x{}", "cd".repeat(65)),
        "origin": {"name": "Safe{Wallet}"},
    })
    .to_string();

    group.throughput(Throughput::Bytes(message.len() as u64));
    group.bench_function("proposed", |b| {
        b.iter(|| black_box(message.parse::<QueueEvent>().is_ok()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_uint256,
    bench_address_coercion,
    bench_row_codec,
    bench_event_decoding
);
criterion_main!(benches);
