//! Shared fixture: one in-memory relay network with servers and clients.

use relay_rpc::{
    CallContext, ClientConfig, ProcessingMode, QueueConfig, RpcClient, RpcServer, ServerConfig,
};
use serde_json::{json, Value};
use shared_relay::{DigestCrypto, InMemoryRelayPool, Keys, MessageCrypto, PublicKey, RelayPool};
use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGING: Once = Once::new();

/// Install the log subscriber once per test binary.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let config = relay_telemetry::TelemetryConfig::for_component("relay-tests");
        if let Ok(guard) = relay_telemetry::init_telemetry(config) {
            // Keep the subscriber for the life of the process
            std::mem::forget(guard);
        }
    });
}

/// Relays every fixture publishes to and listens on.
pub const RELAYS: [&str; 2] = ["wss://relay-a.test", "wss://relay-b.test"];

pub fn relays() -> Vec<String> {
    RELAYS.iter().map(|r| (*r).to_string()).collect()
}

pub fn keys() -> Keys {
    Keys::generate(&DigestCrypto).expect("digest keys never fail")
}

/// In-process relay network. `pool` observes it; every server and client
/// gets its own connection.
pub struct Network {
    pub pool: Arc<InMemoryRelayPool>,
    pub crypto: Arc<dyn MessageCrypto>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        init_logging();
        Self {
            pool: Arc::new(InMemoryRelayPool::new()),
            crypto: Arc::new(DigestCrypto),
        }
    }

    /// A fresh party connection to the shared relays.
    pub fn pool(&self) -> Arc<dyn RelayPool> {
        Arc::new(self.pool.connect())
    }

    pub fn server_config(mode: ProcessingMode) -> ServerConfig {
        ServerConfig {
            relays: relays(),
            processing_mode: mode,
            queue: QueueConfig::default(),
            allowed_authors: Vec::new(),
        }
    }

    pub fn server(&self, config: ServerConfig) -> RpcServer {
        RpcServer::new(config, keys(), self.pool(), Arc::clone(&self.crypto))
            .expect("valid server config")
    }

    /// A server in `mode` with `add`, `echo` and `fail` registered, started.
    pub async fn started_server(&self, mode: ProcessingMode) -> RpcServer {
        let server = self.server(Self::server_config(mode));
        register_defaults(&server);
        server.start().await.expect("server starts");
        server
    }

    pub fn client_config(server: Option<&PublicKey>, timeout: Duration) -> ClientConfig {
        ClientConfig {
            relays: relays(),
            server_public_key: server.cloned(),
            timeout,
            ..ClientConfig::default()
        }
    }

    pub fn client_with(&self, config: ClientConfig) -> RpcClient {
        RpcClient::new(config, keys(), self.pool(), Arc::clone(&self.crypto))
            .expect("valid client config")
    }

    pub fn client(&self, server: &PublicKey, timeout: Duration) -> RpcClient {
        self.client_with(Self::client_config(Some(server), timeout))
    }
}

/// `add {a, b}` → `{a, b, sum}`
pub fn add(ctx: CallContext) -> impl Future<Output = anyhow::Result<Value>> + Send {
    async move {
        let a = ctx.params["a"].as_i64().unwrap_or(0);
        let b = ctx.params["b"].as_i64().unwrap_or(0);
        Ok(json!({"a": a, "b": b, "sum": a + b}))
    }
}

/// Returns the params unchanged.
pub fn echo(ctx: CallContext) -> impl Future<Output = anyhow::Result<Value>> + Send {
    async move { Ok(ctx.params) }
}

/// Always fails with `params.message`.
pub fn fail(ctx: CallContext) -> impl Future<Output = anyhow::Result<Value>> + Send {
    async move {
        let message = ctx.params["message"].as_str().unwrap_or("boom").to_string();
        Err(anyhow::anyhow!(message))
    }
}

pub fn register_defaults(server: &RpcServer) {
    use relay_rpc::AuthConfig;
    server.register_method("add", add, AuthConfig::public());
    server.register_method("echo", echo, AuthConfig::public());
    server.register_method("fail", fail, AuthConfig::public());
}
