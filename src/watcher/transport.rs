use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

/// A live log subscription. The stream ending means the transport failed.
pub struct LogSubscription {
    pub stream: BoxStream<'static, Log>,
    // The pubsub service shuts down when its provider is dropped.
    _provider: Option<DynProvider>,
}

impl LogSubscription {
    pub fn new(stream: BoxStream<'static, Log>) -> Self {
        Self {
            stream,
            _provider: None,
        }
    }

    fn with_provider(stream: BoxStream<'static, Log>, provider: DynProvider) -> Self {
        Self {
            stream,
            _provider: Some(provider),
        }
    }
}

/// Opens push-based log subscriptions against a node.
#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn subscribe(&self, ws_url: &str, filter: Filter) -> eyre::Result<LogSubscription>;
}

/// `eth_subscribe("logs")` over an alloy WebSocket provider. Each call opens
/// its own connection so a batch owns exactly one socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsLogTransport;

#[async_trait]
impl LogTransport for WsLogTransport {
    async fn subscribe(&self, ws_url: &str, filter: Filter) -> eyre::Result<LogSubscription> {
        let ws = WsConnect::new(ws_url);
        let provider = ProviderBuilder::new()
            .connect_ws(ws)
            .await
            .map_err(|e| eyre::eyre!("WebSocket connect to {} failed: {}", ws_url, e))?
            .erased();

        let sub = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| eyre::eyre!("eth_subscribe(logs) failed: {}", e))?;

        Ok(LogSubscription::with_provider(
            sub.into_stream().boxed(),
            provider,
        ))
    }
}
