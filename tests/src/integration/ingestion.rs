//! # Ingestion Flows
//!
//! Broker connector → events handler → session scope → store.
//!
//! ## Flows Tested
//!
//! 1. **Ping**: a published text message reaches the handler exactly once
//! 2. **Proposal**: a proposal event becomes a row
//! 3. **Execution**: an execution event updates that row
//! 4. **Fan-in**: many concurrent messages each get their own scope

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use qs_01_transaction_store::test_utils::{random_address, random_hash};
    use qs_01_transaction_store::{
        InMemoryEngine, MultisigTransactionApi, MultisigTransactionService, SafeOperation,
        MULTISIG_TRANSACTION,
    };
    use queue_runtime::QueueRuntime;
    use shared_bus::{handler_fn, InMemoryBroker, QueueConfig, QueueProvider};
    use shared_types::U256;

    use crate::integration::{eventually, executed_event, proposed_event};

    const EXCHANGE: &str = "safe-transaction-service-events";
    const QUEUE: &str = "queue-service";

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn provider(broker: &InMemoryBroker) -> QueueProvider {
        QueueProvider::new(broker.clone(), QueueConfig::new(EXCHANGE, QUEUE))
    }

    /// Runtime plus a second provider on the same broker acting as producer.
    async fn running_service() -> (QueueRuntime, QueueProvider, Arc<InMemoryEngine>) {
        let broker = InMemoryBroker::new();
        let engine = Arc::new(InMemoryEngine::new());
        let runtime = QueueRuntime::new(provider(&broker), engine.clone());
        runtime.start().await.unwrap();

        let producer = provider(&broker);
        producer.connect().await.unwrap();
        (runtime, producer, engine)
    }

    // =============================================================================
    // CONNECTOR
    // =============================================================================

    #[tokio::test]
    async fn test_ping_is_delivered_exactly_once() {
        let broker = InMemoryBroker::new();
        let provider = provider(&broker);
        assert!(!provider.is_connected());

        provider.connect().await.unwrap();
        assert!(provider.is_connected());

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let seen = calls.clone();
        provider
            .consume(handler_fn(move |message| {
                let tx = tx.clone();
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(message);
                    Ok(())
                }
            }))
            .await
            .unwrap();

        provider.publish("ping").await.unwrap();
        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Timeout waiting for ping")
            .expect("Handler channel closed");
        assert_eq!(received, "ping");

        // Nothing else arrives.
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.ready_count(QUEUE), 0);
        assert_eq!(broker.unacked_count(QUEUE), 0);

        provider.disconnect().await;
        assert!(!provider.is_connected());
    }

    // =============================================================================
    // EVENTS → STORE
    // =============================================================================

    #[tokio::test]
    async fn test_proposal_then_execution() {
        let (runtime, producer, engine) = running_service().await;
        let safe = random_address();
        let safe_tx_hash = random_hash();
        let tx_hash = random_hash();

        producer
            .publish(&proposed_event(&safe_tx_hash, &safe, 7))
            .await
            .unwrap();
        eventually("proposal stored", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 1
        })
        .await;

        producer
            .publish(&executed_event(&safe_tx_hash, &tx_hash, false))
            .await
            .unwrap();

        let store = MultisigTransactionService::new();
        let manager = runtime.manager().clone();
        let executed = timeout(Duration::from_secs(2), async {
            loop {
                let record = manager
                    .run_in_scope(|scope| {
                        let store = &store;
                        async move { store.get_by_key(&scope, &safe_tx_hash).await }
                    })
                    .await
                    .unwrap()
                    .expect("proposal disappeared");
                if record.is_executed() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Timeout waiting for execution");

        assert_eq!(executed.safe, safe);
        assert_eq!(executed.nonce, U256::from(7));
        assert_eq!(executed.value, U256::from(123_456));
        assert_eq!(executed.operation, SafeOperation::Call);
        assert_eq!(executed.tx_hash, Some(tx_hash));
        assert_eq!(executed.failed, Some(false));
        assert!(executed.modified >= executed.created);

        runtime.shutdown().await;
        assert_eq!(runtime.manager().active_scopes(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_events_each_get_a_scope() {
        let (runtime, producer, engine) = running_service().await;
        let safe = random_address();

        for nonce in 0..25 {
            producer
                .publish(&proposed_event(&random_hash(), &safe, nonce))
                .await
                .unwrap();
        }
        eventually("all proposals stored", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 25
        })
        .await;
        eventually("scopes released", || {
            runtime.manager().active_scopes() == 0 && engine.open_sessions() == 0
        })
        .await;

        let store = MultisigTransactionService::new();
        let history = runtime
            .manager()
            .run_in_scope(|scope| {
                let store = &store;
                async move { store.get_by_safe(&scope, &safe).await }
            })
            .await
            .unwrap();
        let nonces: Vec<U256> = history.iter().map(|tx| tx.nonce).collect();
        let expected: Vec<U256> = (0..25u64).rev().map(U256::from).collect();
        assert_eq!(nonces, expected);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_messages_do_not_stop_consumption() {
        let (runtime, producer, engine) = running_service().await;
        let safe = random_address();

        producer.publish("not json").await.unwrap();
        producer
            .publish(r#"{"type":"MULTISIG_TRANSACTION_PROPOSED","nonce":-1}"#)
            .await
            .unwrap();
        producer
            .publish(r#"{"type":"SAFE_CREATED","address":"0x00"}"#)
            .await
            .unwrap();
        producer
            .publish(&proposed_event(&random_hash(), &safe, 1))
            .await
            .unwrap();

        eventually("valid proposal stored", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 1
        })
        .await;
        assert!(runtime.provider().is_connected());

        runtime.shutdown().await;
    }
}
