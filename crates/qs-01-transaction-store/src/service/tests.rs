//! # Multisig Transaction Service Tests

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use shared_types::{Address, Hash, H256, U256};

use super::*;
use crate::adapters::InMemoryEngine;
use crate::domain::entities::SafeOperation;
use crate::ports::outbound::StorageEngine;
use crate::session::SessionManager;
use crate::test_utils::{make_transaction, random_address, random_hash, ManualTimeSource};

struct Fixture {
    manager: SessionManager,
    clock: Arc<ManualTimeSource>,
    service: MultisigTransactionService<Arc<ManualTimeSource>>,
}

async fn make_fixture() -> Fixture {
    let engine = Arc::new(InMemoryEngine::new());
    engine.migrate(&MULTISIG_TRANSACTION).await.unwrap();
    let clock = Arc::new(ManualTimeSource::default());
    Fixture {
        manager: SessionManager::new(engine),
        service: MultisigTransactionService::with_time_source(clock.clone()),
        clock,
    }
}

#[tokio::test]
async fn test_create_and_get_all() {
    let fx = make_fixture().await;
    let record = MultisigTransaction::new(
        H256::repeat_byte(0x01),
        U256::one(),
        Address::repeat_byte(0x02),
        U256::from(7),
    )
    .with_value(U256::from(123_456))
    .with_operation(SafeOperation::Call);

    let guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();
    let stored = fx.service.create(&scope, record.clone()).await.unwrap();
    assert_eq!(stored.created, fx.clock.now());
    assert_eq!(stored.modified, stored.created);

    let all = fx.service.get_all(&scope).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].nonce, U256::from(7));
    assert_eq!(all[0].value, U256::from(123_456));
    assert_eq!(all[0].operation, SafeOperation::Call);
    assert_eq!(all[0].safe_tx_hash, record.safe_tx_hash);
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let fx = make_fixture().await;
    let record = make_transaction(random_address(), 1);

    let guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();
    fx.service.create(&scope, record.clone()).await.unwrap();
    let err = fx.service.create(&scope, record).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Conflict {
            table: "multisig_transaction",
            ..
        }
    ));
    assert_eq!(fx.service.get_all(&scope).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_is_visible_to_later_scopes() {
    let fx = make_fixture().await;
    let record = make_transaction(random_address(), 3);
    let key = record.safe_tx_hash;

    let service = &fx.service;
    fx.manager
        .run_in_scope(|scope| async move { service.create(&scope, record).await })
        .await
        .unwrap();

    let found = fx
        .manager
        .run_in_scope(|scope| async move { service.get_by_key(&scope, &key).await })
        .await
        .unwrap();
    assert_eq!(found.map(|r| r.safe_tx_hash), Some(key));
}

#[tokio::test]
async fn test_get_by_key_missing_is_none() {
    let fx = make_fixture().await;
    let guard = fx.manager.enter_scope(None).unwrap();
    let found = fx
        .service
        .get_by_key(&guard.context(), &random_hash())
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_get_by_safe_orders_newest_first() {
    let fx = make_fixture().await;
    let safe = random_address();
    let guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();

    let older_replacement = fx
        .service
        .create(&scope, make_transaction(safe, 5))
        .await
        .unwrap();
    fx.clock.advance(Duration::seconds(1));
    fx.service
        .create(&scope, make_transaction(safe, 4))
        .await
        .unwrap();
    fx.clock.advance(Duration::seconds(1));
    let newer_replacement = fx
        .service
        .create(&scope, make_transaction(safe, 5))
        .await
        .unwrap();
    fx.service
        .create(&scope, make_transaction(random_address(), 9))
        .await
        .unwrap();

    let history = fx.service.get_by_safe(&scope, &safe).await.unwrap();
    let order: Vec<(U256, Hash)> = history.iter().map(|r| (r.nonce, r.safe_tx_hash)).collect();
    assert_eq!(order.len(), 3);
    assert_eq!(order[0], (U256::from(5), newer_replacement.safe_tx_hash));
    assert_eq!(order[1], (U256::from(5), older_replacement.safe_tx_hash));
    assert_eq!(order[2].0, U256::from(4));
}

#[tokio::test]
async fn test_mark_executed_updates_lifecycle_fields() {
    let fx = make_fixture().await;
    let record = make_transaction(random_address(), 2)
        .with_origin(json!({"url": "https://apps.safe.global"}));
    let key = record.safe_tx_hash;
    let tx_hash = random_hash();

    let guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();
    let created = fx.service.create(&scope, record).await.unwrap();
    fx.clock.advance(Duration::minutes(5));

    let executed = fx
        .service
        .mark_executed(&scope, &key, tx_hash, false)
        .await
        .unwrap();
    assert!(executed.is_executed());
    assert_eq!(executed.failed, Some(false));
    assert_eq!(executed.created, created.created);
    assert_eq!(executed.modified, created.created + Duration::minutes(5));

    let stored = fx.service.get_by_key(&scope, &key).await.unwrap().unwrap();
    assert_eq!(stored.tx_hash, Some(tx_hash));
    assert_eq!(stored.origin["url"], "https://apps.safe.global");
}

#[tokio::test]
async fn test_mark_executed_unknown_is_not_found() {
    let fx = make_fixture().await;
    let guard = fx.manager.enter_scope(None).unwrap();
    let err = fx
        .service
        .mark_executed(&guard.context(), &random_hash(), random_hash(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_update_never_rewrites_created() {
    let fx = make_fixture().await;
    let guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();
    let created = fx
        .service
        .create(&scope, make_transaction(random_address(), 1))
        .await
        .unwrap();

    let mut tampered = created.clone();
    tampered.created = created.created - Duration::days(30);
    tampered.value = U256::MAX;
    fx.clock.advance(Duration::seconds(10));
    let updated = fx.service.update(&scope, tampered).await.unwrap();

    assert_eq!(updated.created, created.created);
    assert_eq!(updated.value, U256::MAX);
    let stored = fx
        .service
        .get_by_key(&scope, &created.safe_tx_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, updated);
}

#[tokio::test]
async fn test_operations_outside_scope_fail() {
    let fx = make_fixture().await;
    let mut guard = fx.manager.enter_scope(None).unwrap();
    let scope = guard.context();
    guard.release().await.unwrap();

    let err = fx.service.get_all(&scope).await.unwrap_err();
    assert!(matches!(err, StoreError::NoActiveScope { .. }));
}
