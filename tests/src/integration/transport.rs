//! # Relay Transport Behavior
//!
//! Partial outages, duplicate delivery across relays, and plain messaging
//! between two clients.

#[cfg(test)]
mod tests {
    use crate::harness::{Network, RELAYS};
    use relay_rpc::{
        AuthConfig, CallContext, ClientConfig, IncomingMessage, ProcessingMode, RpcClient,
        RpcError, SendOutcome,
    };
    use serde_json::{json, Value};
    use shared_relay::REFERENCE_TAG;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn peer(net: &Network, timeout: Duration, strict: bool) -> RpcClient {
        net.client_with(ClientConfig {
            strict_reply_reference: strict,
            ..Network::client_config(None, timeout)
        })
    }

    /// Forward everything `listener_of` hears from `from` into a channel.
    async fn inbox(
        listener_of: &RpcClient,
        from: &RpcClient,
    ) -> (relay_rpc::MessageListener, mpsc::UnboundedReceiver<IncomingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = listener_of
            .listen_for_messages(
                from.public_key(),
                move |message| {
                    let _ = tx.send(message);
                },
                |e| panic!("unexpected listener error: {e}"),
            )
            .await
            .unwrap();
        (listener, rx)
    }

    #[tokio::test]
    async fn test_call_survives_partial_outage() {
        let net = Network::new();
        net.pool.set_online(RELAYS[1], false);
        let server = net.started_server(ProcessingMode::Immediate).await;
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let result = client.call("add", json!({"a": 5, "b": 3})).await.unwrap();

        assert_eq!(result["sum"], 8);
        assert_eq!(net.pool.events_published(RELAYS[1]), 0);
        assert_eq!(net.pool.events_published(RELAYS[0]), 2);
    }

    #[tokio::test]
    async fn test_all_relays_down_fails_fast() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let client = net.client(server.public_key(), Duration::from_secs(30));
        for relay in RELAYS {
            net.pool.set_online(relay, false);
        }

        let err = client.call("add", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportPublishFailure(_)));
        assert!(err.to_string().starts_with("Publish failed"));

        let err = client
            .send_message("hello", server.public_key(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TransportPublishFailure(_)));

        let err = client
            .send_message("hello", server.public_key(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TransportPublishFailure(_)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_processed_once() {
        let net = Network::new();
        let server = net.server(Network::server_config(ProcessingMode::Immediate));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        server.register_method(
            "count",
            move |_ctx: CallContext| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok::<Value, anyhow::Error>(json!(n))
                }
            },
            AuthConfig::public(),
        );
        server.start().await.unwrap();
        let client = net.client(server.public_key(), Duration::from_secs(5));

        let result = client.call("count", json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Request and reply each went out on both relays
        assert_eq!(net.pool.total_published(), 2);
        for relay in RELAYS {
            assert_eq!(net.pool.events_published(relay), 2);
        }
        assert_eq!(result, json!(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_exchange() {
        let net = Network::new();
        let alice = peer(&net, Duration::from_secs(5), false);
        let bob = peer(&net, Duration::from_secs(5), false);
        let (_listener, mut bob_inbox) = inbox(&bob, &alice).await;

        let sent = alice
            .send_message("ping", bob.public_key(), false)
            .await
            .unwrap();
        let SendOutcome::Sent { message_id, .. } = sent else {
            panic!("expected Sent, got {sent:?}");
        };

        let received = bob_inbox.recv().await.unwrap();
        assert_eq!(received.text, "ping");
        assert_eq!(&received.sender, alice.public_key());
        assert_eq!(received.message_id, message_id);
    }

    #[tokio::test]
    async fn test_wait_for_unreferenced_reply() {
        let net = Network::new();
        let alice = peer(&net, Duration::from_secs(5), false);
        let bob = peer(&net, Duration::from_secs(5), false);
        let (_listener, mut bob_inbox) = inbox(&bob, &alice).await;

        let (outcome, ()) = tokio::join!(
            alice.send_message("ping", bob.public_key(), true),
            async {
                let ping = bob_inbox.recv().await.unwrap();
                bob.send_message("pong", &ping.sender, false).await.unwrap();
            },
        );

        match outcome.unwrap() {
            SendOutcome::Replied { reply, sender, .. } => {
                assert_eq!(reply, "pong");
                assert_eq!(&sender, bob.public_key());
            }
            other => panic!("expected Replied, got {other:?}"),
        }
        assert_eq!(alice.message_stats().completed(), 1);
    }

    #[tokio::test]
    async fn test_reply_to_other_message_ignored() {
        let net = Network::new();
        let alice = peer(&net, Duration::from_millis(300), false);
        let bob = peer(&net, Duration::from_secs(5), false);
        let (_listener, mut bob_inbox) = inbox(&bob, &alice).await;
        bob.set_tags(vec![vec![REFERENCE_TAG.into(), "f".repeat(64)]])
            .unwrap();

        let (outcome, ()) = tokio::join!(
            alice.send_message("ping", bob.public_key(), true),
            async {
                let ping = bob_inbox.recv().await.unwrap();
                bob.send_message("pong", &ping.sender, false).await.unwrap();
            },
        );

        let err = outcome.unwrap_err();
        assert!(matches!(err, RpcError::ReplyTimeout { timeout_ms: 300 }));
        assert_eq!(err.to_string(), "Reply timeout after 300ms");
    }

    #[tokio::test]
    async fn test_strict_mode_needs_reference() {
        let net = Network::new();
        let alice = peer(&net, Duration::from_millis(500), true);
        let bob = peer(&net, Duration::from_secs(5), false);
        let (_listener, mut bob_inbox) = inbox(&bob, &alice).await;

        // Unreferenced reply is not enough
        let (outcome, ()) = tokio::join!(
            alice.send_message("ping", bob.public_key(), true),
            async {
                let ping = bob_inbox.recv().await.unwrap();
                bob.send_message("pong", &ping.sender, false).await.unwrap();
            },
        );
        assert!(matches!(outcome, Err(RpcError::ReplyTimeout { .. })));

        // Referenced reply is
        let (outcome, ()) = tokio::join!(
            alice.send_message("ping again", bob.public_key(), true),
            async {
                let ping = bob_inbox.recv().await.unwrap();
                assert_eq!(ping.text, "ping again");
                bob.set_tags(vec![vec![REFERENCE_TAG.into(), ping.message_id.clone()]])
                    .unwrap();
                bob.send_message("pong", &ping.sender, false).await.unwrap();
            },
        );
        assert!(matches!(outcome, Ok(SendOutcome::Replied { .. })));
    }

    #[tokio::test]
    async fn test_closed_listener_stops_delivery() {
        let net = Network::new();
        let alice = peer(&net, Duration::from_secs(5), false);
        let bob = peer(&net, Duration::from_secs(5), false);
        let (listener, mut bob_inbox) = inbox(&bob, &alice).await;

        listener.close();
        assert!(listener.is_closed());
        alice
            .send_message("anyone?", bob.public_key(), false)
            .await
            .unwrap();

        let heard = tokio::time::timeout(Duration::from_millis(100), bob_inbox.recv()).await;
        assert!(!matches!(heard, Ok(Some(_))));
    }
}
