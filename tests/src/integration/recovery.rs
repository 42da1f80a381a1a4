//! # Recovery Flows
//!
//! The service keeps ingesting across broker connection resets, and no
//! session outlives its unit of work when a store call fails.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use qs_01_transaction_store::test_utils::{random_address, random_hash};
    use qs_01_transaction_store::{InMemoryEngine, StorageEngine, MULTISIG_TRANSACTION};
    use queue_runtime::QueueRuntime;
    use shared_bus::{
        ConnectionState, InMemoryBroker, QueueConfig, QueueProvider, RecoveryPolicy,
    };

    use crate::integration::{eventually, proposed_event};

    const EXCHANGE: &str = "events";
    const QUEUE: &str = "queue-service";

    fn fast_recovery() -> RecoveryPolicy {
        RecoveryPolicy {
            initial_delay: Duration::from_millis(10),
            multiplier: 2,
            max_delay: Duration::from_millis(50),
            max_attempts: None,
        }
    }

    fn provider(broker: &InMemoryBroker) -> QueueProvider {
        QueueProvider::new(
            broker.clone(),
            QueueConfig::new(EXCHANGE, QUEUE).with_recovery(fast_recovery()),
        )
    }

    #[tokio::test]
    async fn test_service_survives_connection_reset() {
        let broker = InMemoryBroker::new();
        let engine = Arc::new(InMemoryEngine::new());
        let runtime = QueueRuntime::new(provider(&broker), engine.clone());
        let tag = runtime.start().await.unwrap();

        let producer = provider(&broker);
        producer.connect().await.unwrap();
        let safe = random_address();

        producer
            .publish(&proposed_event(&random_hash(), &safe, 1))
            .await
            .unwrap();
        eventually("first proposal stored", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 1
        })
        .await;

        broker.sever();
        eventually("both links reopened", || {
            runtime.provider().is_connected()
                && producer.is_connected()
                && broker.open_links() == 2
                && broker.consumer_count(QUEUE) == 1
        })
        .await;
        assert_eq!(runtime.consumer_tag(), Some(tag));

        producer
            .publish(&proposed_event(&random_hash(), &safe, 2))
            .await
            .unwrap();
        eventually("second proposal stored", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 2
        })
        .await;

        runtime.shutdown().await;
        assert_eq!(
            runtime.provider().state(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_messages_queue_up_while_broker_is_away() {
        let broker = InMemoryBroker::new();
        let engine = Arc::new(InMemoryEngine::new());
        engine.migrate(&MULTISIG_TRANSACTION).await.unwrap();

        // Producer connects first so the queue exists before the service.
        let producer = provider(&broker);
        producer.connect().await.unwrap();
        let safe = random_address();
        for nonce in 0..3 {
            producer
                .publish(&proposed_event(&random_hash(), &safe, nonce))
                .await
                .unwrap();
        }
        assert_eq!(broker.ready_count(QUEUE), 3);

        let runtime = QueueRuntime::new(provider(&broker), engine.clone());
        runtime.start().await.unwrap();
        eventually("backlog drained", || {
            engine.committed_rows(&MULTISIG_TRANSACTION) == 3
        })
        .await;
        assert_eq!(broker.ready_count(QUEUE), 0);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_sessions_released_after_failed_units_of_work() {
        let broker = InMemoryBroker::new();
        let engine = Arc::new(InMemoryEngine::new());
        let runtime = QueueRuntime::new(provider(&broker), engine.clone());
        runtime.start().await.unwrap();

        let producer = provider(&broker);
        producer.connect().await.unwrap();

        // The same proposal twice: the second insert conflicts.
        let hash = random_hash();
        let event = proposed_event(&hash, &random_address(), 4);
        producer.publish(&event).await.unwrap();
        producer.publish(&event).await.unwrap();

        eventually("both deliveries settled", || {
            broker.ready_count(QUEUE) == 0 && broker.unacked_count(QUEUE) == 0
        })
        .await;
        eventually("sessions released", || {
            runtime.manager().active_scopes() == 0 && engine.open_sessions() == 0
        })
        .await;
        assert_eq!(engine.committed_rows(&MULTISIG_TRANSACTION), 1);

        runtime.shutdown().await;
    }
}
