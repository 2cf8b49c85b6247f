//! Test harness for integration tests.
//!
//! Provides a server running on an ephemeral port plus raw protocol helpers
//! for driving exchanges that the well-behaved client cannot produce.

use futures::{SinkExt, StreamExt};
use sage_client::ClientConfig;
use sage_pow::solve;
use sage_protocol::{
    ChallengePayload, FrameCodec, Message, Payload, ProtocolError, SolutionPayload,
};
use sage_server::{AdmissionPipeline, GateServer, QuoteBook, ServerConfig, ServerResult};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// A framed raw connection to the test server.
pub type RawConn = Framed<TcpStream, FrameCodec>;

/// A sage server running on an ephemeral port for the duration of a test.
pub struct TestServer {
    /// Bound address.
    pub addr: SocketAddr,
    /// The server's admission pipeline, for asserting on counters.
    pub admission: Arc<AdmissionPipeline>,
    shutdown: CancellationToken,
    handle: JoinHandle<ServerResult<()>>,
}

impl TestServer {
    /// Start a server with test-friendly per-IP limits (every test client
    /// shares 127.0.0.1) after applying the given config overrides.
    pub async fn start(mutate: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            read_timeout: Duration::from_secs(10),
            initial_difficulty: 1,
            ..Default::default()
        };
        config.protection.max_conns_per_ip = 100;
        config.protection.request_burst = 100;
        config.protection.flood_bucket_size = 1000;
        mutate(&mut config);

        let server = GateServer::bind(config, Arc::new(QuoteBook::new()))
            .await
            .expect("failed to bind test server");

        let addr = server.local_addr();
        let admission = server.admission();
        let shutdown = server.shutdown_token();
        let handle = tokio::spawn(server.run());

        Self {
            addr,
            admission,
            shutdown,
            handle,
        }
    }

    /// Client configuration pointing at this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_addr: self.addr.to_string(),
            ..Default::default()
        }
    }

    /// Open a raw framed connection.
    pub async fn connect_raw(&self) -> RawConn {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("failed to dial test server");
        Framed::new(stream, FrameCodec::new())
    }

    /// Cancel the shutdown token and wait for the server to stop.
    pub async fn stop(self) -> ServerResult<()> {
        self.shutdown.cancel();
        self.handle.await.expect("server task panicked")
    }
}

/// Read one payload, or `None` when the server closed without framing.
///
/// A reset mid-read counts as closed: some rejections tear the socket down
/// with bytes still in flight.
pub async fn recv_payload(conn: &mut RawConn) -> Option<Payload> {
    match conn.next().await {
        Some(Ok(msg)) => Some(msg.payload().expect("payload must parse")),
        Some(Err(ProtocolError::Io(_))) => None,
        Some(Err(e)) => panic!("unexpected protocol error: {e}"),
        None => None,
    }
}

/// Read a challenge, failing the test on anything else.
pub async fn recv_challenge(conn: &mut RawConn) -> ChallengePayload {
    match recv_payload(conn).await {
        Some(Payload::Challenge(c)) => c,
        other => panic!("expected challenge, got {other:?}"),
    }
}

/// Send a solution payload.
pub async fn send_solution(conn: &mut RawConn, solution: SolutionPayload) {
    let msg = Message::from_payload(&Payload::Solution(solution)).expect("solution must frame");
    conn.send(msg).await.expect("send must succeed");
}

/// Solve a challenge and answer it correctly.
pub async fn answer_challenge(conn: &mut RawConn, challenge: &ChallengePayload) {
    let stop = AtomicBool::new(false);
    let answer =
        solve(&challenge.prefix, challenge.difficulty, &stop).expect("solver must find an answer");
    send_solution(
        conn,
        SolutionPayload {
            prefix: challenge.prefix.clone(),
            solution: answer,
            nonce: challenge.nonce.clone(),
        },
    )
    .await;
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    check()
}
