//! MLLP server (C9): one `TcpListener` per configured listener, one
//! `Framed<TcpStream, MllpCodec>` read loop per accepted connection.
//! Grounded on
//! `examples/hamaluik-hermes/src-tauri/src/commands/communication/listen.rs`'s
//! accept loop, reworked from a Tauri-managed single listener emitting UI
//! events into a plain background task per spec.md §4.9's transport
//! description: idle timeout, per-endpoint circuit breaker, ACK write-back.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::config::MllpListener;
use crate::domain::model::{LogStatus, TransportKind};
use crate::transport::GatewayState;
use crate::wire::mllp::MllpCodec;

/// Trips after `threshold` consecutive frame-level or message-parse errors
/// on a listener and refuses new work for `cooldown`, the way spec.md §4.9
/// describes a per-endpoint (not per-connection) breaker.
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_errors: AtomicU32,
    tripped_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold,
            cooldown,
            consecutive_errors: AtomicU32::new(0),
            tripped_until: Mutex::new(None),
        }
    }

    async fn is_open(&self) -> bool {
        let guard = self.tripped_until.lock().await;
        matches!(*guard, Some(until) if Instant::now() < until)
    }

    fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    async fn record_error(&self) {
        let n = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.threshold {
            let mut guard = self.tripped_until.lock().await;
            *guard = Some(Instant::now() + self.cooldown);
            self.consecutive_errors.store(0, Ordering::SeqCst);
            log::error!("circuit breaker tripped after {n} consecutive parse errors, cooling down for {:?}", self.cooldown);
        }
    }
}

/// Binds and serves one configured listener until the process shuts down.
/// Spawned once per entry in `config.pam.mllp_listeners`.
pub async fn run_listener(state: Arc<GatewayState>, cfg: MllpListener) -> std::io::Result<()> {
    let listener = TcpListener::bind(&cfg.bind_address).await?;
    log::info!("MLLP listener bound on {}", cfg.bind_address);

    let breaker = Arc::new(CircuitBreaker::new(
        state.config.pam.circuit_breaker_error_threshold,
        Duration::from_secs(state.config.pam.circuit_breaker_cooldown_seconds),
    ));

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                log::error!("failed to accept MLLP connection: {e}");
                continue;
            }
        };
        let state = state.clone();
        let breaker = breaker.clone();
        tokio::spawn(async move {
            handle_connection(state, breaker, stream, remote).await;
        });
    }
}

async fn handle_connection(state: Arc<GatewayState>, breaker: Arc<CircuitBreaker>, stream: TcpStream, remote: SocketAddr) {
    log::info!("accepted MLLP connection from {remote}");
    let idle_timeout = Duration::from_secs(state.config.pam.socket_idle_timeout_seconds);
    let mut transport = Framed::new(stream, MllpCodec::new(state.config.pam.max_frame_bytes));

    loop {
        if breaker.is_open().await {
            log::warn!("circuit breaker open on this listener, closing connection from {remote}");
            break;
        }

        let frame = match tokio::time::timeout(idle_timeout, transport.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                log::error!("MLLP decode error from {remote}: {e}");
                breaker.record_error().await;
                continue;
            }
            Ok(None) => {
                log::info!("connection from {remote} closed by peer");
                break;
            }
            Err(_) => {
                log::info!("idle timeout on connection from {remote}");
                break;
            }
        };

        let outcome = state.process_inbound(&frame, TransportKind::Mllp).await;
        if matches!(outcome.status, LogStatus::ParseError) {
            breaker.record_error().await;
        } else {
            breaker.record_success();
        }

        if let Err(e) = transport.send(outcome.ack.clone()).await {
            log::error!("failed to send ACK to {remote}: {e}");
            break;
        }
    }
}
