//! # Authorization Flows
//!
//! Global author whitelist (static or provider-backed) and per-method
//! authorization, seen from the client.

#[cfg(test)]
mod tests {
    use crate::harness::{add, keys, Network};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_rpc::{AuthConfig, ProcessingMode, RpcError, WhitelistProvider};
    use serde_json::json;
    use shared_relay::PublicKey;
    use std::sync::Arc;
    use std::time::Duration;

    /// Whitelist that can be swapped while the server runs.
    #[derive(Default)]
    struct Roster {
        members: Mutex<Option<Vec<PublicKey>>>,
    }

    impl Roster {
        fn set(&self, members: Option<Vec<PublicKey>>) {
            *self.members.lock() = members;
        }
    }

    #[async_trait]
    impl WhitelistProvider for Roster {
        async fn author_whitelist(&self) -> Option<Vec<PublicKey>> {
            self.members.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_whitelist_mode_with_empty_lists_allows() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        server.register_method("add", add, AuthConfig::whitelist(Vec::new()));
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let result = client.call("add", json!({"a": 1, "b": 2})).await.unwrap();

        assert_eq!(result["sum"], 3);
    }

    #[tokio::test]
    async fn test_unlisted_author_gets_no_reply() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        server.add_to_whitelist([keys().public_key().clone()]);
        let client = net.client(server.public_key(), Duration::from_millis(200));

        let err = client.call("add", json!({"a": 1, "b": 2})).await.unwrap_err();

        assert!(matches!(err, RpcError::RequestTimeout { .. }));
    }

    #[tokio::test]
    async fn test_listed_author_is_served() {
        let net = Network::new();
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));
        server.add_to_whitelist([client.public_key().clone()]);

        assert!(server.is_in_whitelist(client.public_key()).await);
        assert!(client.call("add", json!({"a": 1, "b": 2})).await.is_ok());

        server.clear_whitelist();
        assert!(server.author_whitelist().await.is_none());
    }

    #[tokio::test]
    async fn test_seeded_from_config_npub() {
        let net = Network::new();
        let client_keys = keys();
        let mut config = Network::server_config(ProcessingMode::Immediate);
        config.allowed_authors = vec![client_keys.public_key().to_npub()];
        let server = net.server(config);

        assert!(server.is_in_whitelist(client_keys.public_key()).await);
        assert!(!server.is_in_whitelist(keys().public_key()).await);
    }

    #[tokio::test]
    async fn test_provider_takes_precedence() {
        let net = Network::new();
        let roster = Arc::new(Roster::default());
        let server = net
            .server(Network::server_config(ProcessingMode::Immediate))
            .with_whitelist_provider(roster.clone());
        crate::harness::register_defaults(&server);
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_millis(300));

        // Static list would admit the client; the provider does not
        server.add_to_whitelist([client.public_key().clone()]);
        roster.set(Some(vec![keys().public_key().clone()]));
        let err = client.call("add", json!({"a": 1, "b": 1})).await.unwrap_err();
        assert!(matches!(err, RpcError::RequestTimeout { .. }));

        // Consulted per event
        roster.set(Some(vec![client.public_key().clone()]));
        assert!(client.call("add", json!({"a": 1, "b": 1})).await.is_ok());

        // No list from the provider means unrestricted
        roster.set(None);
        assert!(client.call("add", json!({"a": 1, "b": 1})).await.is_ok());
    }

    #[tokio::test]
    async fn test_method_whitelist_denies_others() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        server.register_method(
            "add",
            add,
            AuthConfig::whitelist([keys().public_key().clone()]),
        );
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let err = client.call("add", json!({"a": 1, "b": 2})).await.unwrap_err();

        assert!(matches!(err, RpcError::RemoteError(_)));
        assert_eq!(err.to_string(), "Permission denied for method: add");
    }

    #[tokio::test]
    async fn test_method_falls_back_to_global_list() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        server.register_method("add", add, AuthConfig::whitelist(Vec::new()));
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(5));
        server.add_to_whitelist([client.public_key().clone()]);

        assert!(client.call("add", json!({"a": 2, "b": 2})).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_handler() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let vip = net.client(server.public_key(), Duration::from_secs(5));
        let guest = net.client(server.public_key(), Duration::from_secs(5));

        let allowed = vip.public_key().clone();
        server.register_method(
            "add",
            add,
            AuthConfig::custom(move |sender: &PublicKey| *sender == allowed),
        );
        server.start().await.unwrap();

        assert!(vip.call("add", json!({"a": 1, "b": 1})).await.is_ok());
        let err = guest.call("add", json!({"a": 1, "b": 1})).await.unwrap_err();
        assert_eq!(err.to_string(), "Permission denied for method: add");
    }
}
