//! # Queued Processing
//!
//! Server in queued mode: events are stored on arrival, then processed in
//! rate-limited batches and acknowledged in dequeue order.

#[cfg(test)]
mod tests {
    use crate::harness::{register_defaults, Network};
    use relay_rpc::{
        AckStatus, AuthConfig, CallContext, InMemoryEventStorage, ProcessingMode, QueueConfig,
        RpcError, RpcServer, SystemTimeSource,
    };
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn queued_server(net: &Network, rate: u32) -> (RpcServer, Arc<InMemoryEventStorage>) {
        let storage = Arc::new(InMemoryEventStorage::new(Arc::new(SystemTimeSource)));
        let mut config = Network::server_config(ProcessingMode::Queued);
        config.queue = QueueConfig {
            processing_rate: rate,
            ..QueueConfig::default()
        };
        let server = net.server(config).with_storage(storage.clone());
        register_defaults(&server);
        (server, storage)
    }

    /// Start, then let the immediate first tick pass so the next one is a
    /// full interval away.
    async fn start_and_settle(server: &RpcServer) {
        server.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    async fn wait_for_pending(server: &RpcServer, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while server.pending_events().await.unwrap() < count {
            assert!(Instant::now() < deadline, "queue never reached {count}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_success_and_failure_acked_in_order() {
        let net = Network::new();
        let (server, storage) = queued_server(&net, 3);
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let (ok, failed) = tokio::join!(
            client.call("add", json!({"a": 2, "b": 2})),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                client.call("fail", json!({"message": "disk full"})).await
            },
        );

        assert_eq!(ok.unwrap()["sum"], 4);
        assert_eq!(failed.unwrap_err().to_string(), "disk full");

        let acks: Vec<AckStatus> = storage.acks().into_iter().map(|(_, ack)| ack).collect();
        assert_eq!(
            acks,
            vec![
                AckStatus::Success,
                AckStatus::Failed {
                    error: "disk full".into()
                },
            ]
        );
        assert_eq!(server.pending_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rate_limits_throughput() {
        let net = Network::new();
        let (server, storage) = queued_server(&net, 1);
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(10));

        let started = Instant::now();
        let (a, b, c) = tokio::join!(
            client.call("add", json!({"a": 1, "b": 0})),
            client.call("add", json!({"a": 2, "b": 0})),
            client.call("add", json!({"a": 3, "b": 0})),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        // One event per second
        assert!(started.elapsed() >= Duration::from_millis(1900));
        assert_eq!(storage.acks().len(), 3);
    }

    #[tokio::test]
    async fn test_sender_revoked_while_queued() {
        let net = Network::new();
        let (server, storage) = queued_server(&net, 1);
        let client = net.client(server.public_key(), Duration::from_millis(2500));
        let other = crate::harness::keys();
        server.add_to_whitelist([client.public_key().clone(), other.public_key().clone()]);
        start_and_settle(&server).await;

        let (result, ()) = tokio::join!(client.call("add", json!({"a": 1, "b": 1})), async {
            wait_for_pending(&server, 1).await;
            server.remove_from_whitelist(&[client.public_key().clone()]);
        });

        assert!(matches!(result, Err(RpcError::RequestTimeout { .. })));
        assert_eq!(
            storage.acks().into_iter().map(|(_, ack)| ack).collect::<Vec<_>>(),
            vec![AckStatus::Failed {
                error: "sender_not_allowed".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_stop_halts_queue() {
        let net = Network::new();
        let (server, _storage) = queued_server(&net, 1);
        start_and_settle(&server).await;
        let client = net.client(server.public_key(), Duration::from_millis(1500));

        let (result, ()) = tokio::join!(client.call("add", json!({"a": 1, "b": 1})), async {
            wait_for_pending(&server, 1).await;
            server.stop().await;
        });

        assert!(matches!(result, Err(RpcError::RequestTimeout { .. })));
        assert_eq!(server.pending_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_finishes_batch_in_progress() {
        let net = Network::new();
        let (server, storage) = queued_server(&net, 3);
        server.register_method(
            "slow",
            |ctx: CallContext| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, anyhow::Error>(ctx.params)
            },
            AuthConfig::public(),
        );
        start_and_settle(&server).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let (result, ()) = tokio::join!(client.call("slow", json!({"n": 1})), async {
            wait_for_pending(&server, 1).await;
            // Dequeued by the next tick, then stopped mid-batch
            while server.pending_events().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            server.stop().await;
            assert_eq!(storage.acks().len(), 1);
        });

        assert_eq!(result.unwrap(), json!({"n": 1}));
        assert!(storage.acks()[0].1.is_success());
    }

    #[tokio::test]
    async fn test_stopping_server_leaves_other_parties_subscribed() {
        let net = Network::new();
        let (queued, _storage) = queued_server(&net, 3);
        queued.start().await.unwrap();
        let other = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(other.public_key(), Duration::from_secs(5));

        queued.stop().await;

        let result = client.call("add", json!({"a": 4, "b": 4})).await.unwrap();
        assert_eq!(result["sum"], 8);
        assert_eq!(net.pool.active_subscriptions(), 1);
    }
}
