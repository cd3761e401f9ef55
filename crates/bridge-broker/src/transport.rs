//! Gateway transport abstraction and the TCP implementation.
//!
//! The link is generic over the transport so tests can substitute the
//! scripted gateway in [`crate::testing`].

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::gateway::{GatewayEvent, GatewayRequest};

/// Factory for gateway connections. One transport outlives many
/// connection attempts.
pub trait GatewayTransport: Send + 'static {
    type Stream: GatewayStream;

    fn connect(
        &mut self,
        config: &BrokerConfig,
    ) -> impl Future<Output = BrokerResult<Self::Stream>> + Send;
}

/// A single established gateway connection.
pub trait GatewayStream: Send {
    fn send(
        &mut self,
        request: GatewayRequest,
    ) -> impl Future<Output = BrokerResult<()>> + Send;

    /// Next inbound event. `None` means the connection closed.
    fn next_event(
        &mut self,
    ) -> impl Future<Output = Option<BrokerResult<GatewayEvent>>> + Send;
}

/// Production transport: newline-delimited JSON over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

pub struct TcpGatewayStream {
    framed: Framed<TcpStream, LinesCodec>,
}

impl GatewayTransport for TcpTransport {
    type Stream = TcpGatewayStream;

    async fn connect(&mut self, config: &BrokerConfig) -> BrokerResult<TcpGatewayStream> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| BrokerError::ConnectionRefused(format!("{addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Ok(TcpGatewayStream {
            framed: Framed::new(stream, LinesCodec::new()),
        })
    }
}

impl GatewayStream for TcpGatewayStream {
    async fn send(&mut self, request: GatewayRequest) -> BrokerResult<()> {
        let line = serde_json::to_string(&request)?;
        self.framed
            .send(line)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<BrokerResult<GatewayEvent>> {
        match self.framed.next().await? {
            Ok(line) => Some(serde_json::from_str(&line).map_err(BrokerError::from)),
            Err(e) => Some(Err(BrokerError::Transport(e.to_string()))),
        }
    }
}
