//! Quote service client.

use crate::error::{ClientError, ClientResult};
use futures::{SinkExt, StreamExt};
use sage_pow::solve_blocking;
use sage_protocol::{
    ChallengePayload, FrameCodec, Message, MessageType, Payload, ProtocolError, QuotePayload,
    SolutionPayload,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to dial.
    pub server_addr: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-read ceiling.
    pub read_timeout: Duration,
    /// Per-write ceiling.
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "localhost:4040".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// A connection to the quote server.
pub struct Client {
    config: ClientConfig,
    framed: Framed<TcpStream, FrameCodec>,
}

impl Client {
    /// Dial the server.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(&config.server_addr),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout)??;

        info!(addr = %config.server_addr, "connected to server");

        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
            config,
        })
    }

    /// Run the full exchange: receive a challenge, solve it, trade the
    /// solution for a quote.
    ///
    /// Cancelling the token stops the solver workers and aborts the
    /// exchange.
    pub async fn get_quote(&mut self, cancel: &CancellationToken) -> ClientResult<QuotePayload> {
        let challenge = self.receive_challenge().await?;
        debug!(
            difficulty = challenge.difficulty,
            expires_at = %challenge.expires_at,
            "received challenge"
        );

        let stop = Arc::new(AtomicBool::new(false));
        let solving = solve_blocking(
            challenge.prefix.clone(),
            challenge.difficulty,
            Arc::clone(&stop),
        );

        let solution = tokio::select! {
            solution = solving => solution.ok_or(ClientError::Cancelled)?,
            _ = cancel.cancelled() => {
                stop.store(true, Ordering::Relaxed);
                return Err(ClientError::Cancelled);
            }
        };
        debug!(solution = %solution, "challenge solved");

        self.send(&Payload::Solution(SolutionPayload {
            prefix: challenge.prefix,
            solution,
            nonce: challenge.nonce,
        }))
        .await?;

        self.receive_quote().await
    }

    /// Close the connection.
    pub async fn close(self) -> ClientResult<()> {
        let mut stream = self.framed.into_inner();
        stream.shutdown().await?;
        Ok(())
    }

    async fn receive_challenge(&mut self) -> ClientResult<ChallengePayload> {
        let msg = self.read_message().await?;
        if msg.msg_type != MessageType::Challenge {
            return Err(ClientError::UnexpectedMessage(msg.msg_type));
        }

        let challenge: ChallengePayload =
            serde_json::from_slice(&msg.payload).map_err(ProtocolError::from)?;
        challenge.validate()?;
        Ok(challenge)
    }

    async fn receive_quote(&mut self) -> ClientResult<QuotePayload> {
        let msg = self.read_message().await?;
        match msg.msg_type {
            MessageType::Quote => {
                let quote: QuotePayload =
                    serde_json::from_slice(&msg.payload).map_err(ProtocolError::from)?;
                quote.validate()?;
                Ok(quote)
            }
            MessageType::Error => {
                let error: sage_protocol::ErrorPayload =
                    serde_json::from_slice(&msg.payload).map_err(ProtocolError::from)?;
                Err(ClientError::Server {
                    code: error.code,
                    message: error.message,
                })
            }
            other => Err(ClientError::UnexpectedMessage(other)),
        }
    }

    async fn read_message(&mut self) -> ClientResult<Message> {
        match tokio::time::timeout(self.config.read_timeout, self.framed.next()).await {
            Ok(Some(Ok(msg))) => Ok(msg),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Err(ClientError::ConnectionClosed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn send(&mut self, payload: &Payload) -> ClientResult<()> {
        let msg = Message::from_payload(payload)?;
        match tokio::time::timeout(self.config.write_timeout, self.framed.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 on localhost is never listening
        let config = ClientConfig {
            server_addr: "127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(Client::connect(config).await.is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.server_addr, "localhost:4040");
    }
}
