//! # Concurrent Calls
//!
//! Many calls in flight on one client, some answered in time and some not.
//! Every call must settle exactly once and leave nothing behind.

#[cfg(test)]
mod tests {
    use crate::harness::Network;
    use futures::future::join_all;
    use rand::Rng;
    use relay_rpc::{AuthConfig, CallContext, ProcessingMode, RpcError};
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn slow(ctx: CallContext) -> anyhow::Result<Value> {
        let delay = ctx.params["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({"slept": delay}))
    }

    #[tokio::test]
    async fn test_concurrent_calls_each_get_own_reply() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let mut rng = rand::thread_rng();
        let inputs: Vec<(i64, i64)> = (0..20)
            .map(|_| (rng.gen_range(-1000..1000), rng.gen_range(-1000..1000)))
            .collect();

        let results = join_all(
            inputs
                .iter()
                .map(|(a, b)| client.call("add", json!({"a": a, "b": b}))),
        )
        .await;

        for ((a, b), result) in inputs.iter().zip(results) {
            assert_eq!(result.unwrap()["sum"], json!(a + b));
        }
        assert_eq!(client.call_stats().completed(), 20);
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_mixed_timeouts_settle_exactly_once() {
        const CALLS: u64 = 12;

        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        server.register_method("slow", slow, AuthConfig::public());
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_millis(300));

        // Every third call answers well after the deadline
        let results = join_all((0..CALLS).map(|i| {
            let delay = if i % 3 == 0 { 900 } else { 0 };
            client.call("slow", json!({"delay_ms": delay}))
        }))
        .await;

        let timeouts = results
            .iter()
            .filter(|r| matches!(r, Err(RpcError::RequestTimeout { timeout_ms: 300 })))
            .count() as u64;
        let answered = results.iter().filter(|r| r.is_ok()).count() as u64;
        assert_eq!(timeouts, CALLS / 3);
        assert_eq!(answered, CALLS - CALLS / 3);

        // Let the late replies land; they must not settle anything twice
        tokio::time::sleep(Duration::from_millis(900)).await;

        let stats = client.call_stats();
        assert_eq!(stats.registered(), CALLS);
        assert_eq!(stats.completed() + stats.timeouts(), CALLS);
        assert_eq!(stats.timeouts(), CALLS / 3);
        assert_eq!(client.pending_calls(), 0);
        // Only the server's listener remains
        assert_eq!(net.pool.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_subscription() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let client = net.client(server.public_key(), Duration::from_secs(30));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            client.call("add", json!({"a": 1, "b": 1})),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(client.call_stats().cancelled(), 1);
        assert_eq!(net.pool.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_two_clients_share_one_server() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let alice = net.client(server.public_key(), Duration::from_secs(5));
        let bob = net.client(server.public_key(), Duration::from_secs(5));

        let (a, b) = tokio::join!(
            alice.call("add", json!({"a": 1, "b": 2})),
            bob.call("add", json!({"a": 10, "b": 20})),
        );

        assert_eq!(a.unwrap()["sum"], 3);
        assert_eq!(b.unwrap()["sum"], 30);
    }
}
