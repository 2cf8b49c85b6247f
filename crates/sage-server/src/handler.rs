//! Per-connection protocol exchange.

use crate::admission::SlowReadGuard;
use crate::error::{ServerError, ServerResult};
use crate::quotes::QuoteSource;
use futures::{SinkExt, StreamExt};
use sage_pow::PowService;
use sage_protocol::{
    FrameCodec, Message, MessageType, Payload, ProtocolError, QuotePayload, SolutionPayload,
    CODE_INTERNAL_ERROR, CODE_INVALID_MESSAGE_TYPE, CODE_INVALID_SOLUTION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, error};

/// Shared collaborators and timeouts for connection handlers.
pub(crate) struct HandlerContext {
    /// Challenge issuance and verification.
    pub pow: Arc<PowService>,
    /// Quote source for verified clients.
    pub quotes: Arc<dyn QuoteSource>,
    /// Total deadline for the whole exchange.
    pub exchange_timeout: Duration,
    /// Per-read ceiling.
    pub read_timeout: Duration,
    /// Per-write ceiling.
    pub write_timeout: Duration,
}

/// Drive one challenge/solution exchange on an admitted connection.
///
/// The whole exchange runs under a single deadline; individual reads and
/// writes carry their own ceilings on top. Errors that are not a clean
/// close are counted against the peer by the caller.
pub(crate) async fn handle_connection<S>(
    io: SlowReadGuard<S>,
    addr: SocketAddr,
    difficulty: u8,
    ctx: &HandlerContext,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, FrameCodec::new());

    match tokio::time::timeout(ctx.exchange_timeout, exchange(&mut framed, addr, difficulty, ctx))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(ServerError::Timeout),
    }
}

async fn exchange<S>(
    framed: &mut Framed<SlowReadGuard<S>, FrameCodec>,
    addr: SocketAddr,
    difficulty: u8,
    ctx: &HandlerContext,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = match ctx.pow.create_challenge(difficulty) {
        Ok(challenge) => challenge,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to create challenge");
            send_error(framed, CODE_INTERNAL_ERROR, "failed to create challenge", ctx).await?;
            // Our fault, not the peer's
            return Ok(());
        }
    };

    debug!(addr = %addr, difficulty, nonce = %challenge.nonce, "sending challenge");
    send_payload(framed, &Payload::Challenge((&challenge).into()), ctx).await?;

    let msg = read_message(framed, ctx.read_timeout).await?;
    if msg.msg_type != MessageType::Solution {
        send_error(framed, CODE_INVALID_MESSAGE_TYPE, "expected a solution", ctx).await?;
        return Err(ServerError::UnexpectedMessage(msg.msg_type));
    }

    let solution: SolutionPayload =
        serde_json::from_slice(&msg.payload).map_err(ProtocolError::from)?;
    solution.validate()?;

    if !ctx.pow.verify_solution(&solution) {
        send_error(framed, CODE_INVALID_SOLUTION, "solution verification failed", ctx).await?;
        return Err(ServerError::InvalidSolution);
    }

    let quote = ctx.quotes.next_quote();
    debug!(addr = %addr, author = %quote.author, "solution verified, sending quote");
    send_payload(
        framed,
        &Payload::Quote(QuotePayload {
            text: quote.text,
            author: quote.author,
        }),
        ctx,
    )
    .await
}

async fn read_message<S>(
    framed: &mut Framed<SlowReadGuard<S>, FrameCodec>,
    timeout: Duration,
) -> ServerResult<Message>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, framed.next()).await {
        Ok(Some(Ok(msg))) => Ok(msg),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => Err(ServerError::ConnectionClosed),
        Err(_) => Err(ServerError::Timeout),
    }
}

async fn send_payload<S>(
    framed: &mut Framed<SlowReadGuard<S>, FrameCodec>,
    payload: &Payload,
    ctx: &HandlerContext,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = Message::from_payload(payload)?;
    match tokio::time::timeout(ctx.write_timeout, framed.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ServerError::Timeout),
    }
}

async fn send_error<S>(
    framed: &mut Framed<SlowReadGuard<S>, FrameCodec>,
    code: &str,
    message: &str,
    ctx: &HandlerContext,
) -> ServerResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_payload(
        framed,
        &Payload::Error(sage_protocol::ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
        }),
        ctx,
    )
    .await
}
