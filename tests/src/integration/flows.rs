//! # End-to-End Call Flows
//!
//! Client and server on one relay network in immediate mode.
//!
//! ## Coverage
//!
//! - Successful call returns the handler's result
//! - Unknown methods come back as remote errors
//! - Handler failures come back as remote errors
//! - A silent server times the call out and releases its subscription
//! - Lifecycle notifications on start and stop

#[cfg(test)]
mod tests {
    use crate::harness::Network;
    use relay_rpc::{LifecycleEvent, ProcessingMode, RpcError};
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_add_round_trip() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let result = client.call("add", json!({"a": 5, "b": 3})).await.unwrap();

        assert_eq!(result, json!({"a": 5, "b": 3, "sum": 8}));
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(client.call_stats().completed(), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_reuse_nothing() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        for i in 0..5 {
            let result = client.call("add", json!({"a": i, "b": i})).await.unwrap();
            assert_eq!(result["sum"], json!(i * 2));
        }

        // Only the server's listener remains
        assert_eq!(net.pool.active_subscriptions(), 1);
        assert_eq!(client.call_stats().registered(), 5);
    }

    #[tokio::test]
    async fn test_unknown_method_is_remote_error() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let err = client.call("foo", json!({})).await.unwrap_err();

        assert!(matches!(err, RpcError::RemoteError(_)));
        assert_eq!(err.to_string(), "Method not found: foo");
    }

    #[tokio::test]
    async fn test_handler_failure_is_remote_error() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let err = client
            .call("fail", json!({"message": "ledger locked"}))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "ledger locked");
        assert_eq!(client.call_stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_params_default_to_empty_object() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let result = client.call("echo", serde_json::Value::Null).await.unwrap();

        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let net = Network::new();
        // Registered but never started: nobody answers
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let client = net.client(server.public_key(), Duration::from_millis(100));

        let started = Instant::now();
        let err = client.call("add", json!({"a": 1, "b": 2})).await.unwrap_err();

        assert!(matches!(err, RpcError::RequestTimeout { timeout_ms: 100 }));
        assert_eq!(err.to_string(), "Request timeout after 100ms");
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(client.call_stats().timeouts(), 1);
        assert_eq!(net.pool.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_started_and_stopped() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let mut lifecycle = server.lifecycle();

        server.start().await.unwrap();
        assert!(server.is_running().await);
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Started);

        server.stop().await;
        assert!(!server.is_running().await);
        assert_eq!(lifecycle.recv().await.unwrap(), LifecycleEvent::Stopped);
        assert_eq!(net.pool.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_stopped_server_no_longer_answers() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_millis(200));

        assert!(client.call("add", json!({"a": 1, "b": 1})).await.is_ok());
        server.stop().await;

        let err = client.call("add", json!({"a": 1, "b": 1})).await.unwrap_err();
        assert!(matches!(err, RpcError::RequestTimeout { .. }));
    }
}
