//! MLLP client: one connect-send-await-ack round trip per dispatch. Grounded
//! on `examples/hamaluik-hermes/src-tauri/src/commands/communication/send.rs`'s
//! `send_message` — the connect/`Framed`/timeout-on-`next` shape is kept,
//! reworked from a Tauri command emitting UI events into a plain async
//! function returning a `SendOutcome` the emission engine logs.

use futures::{SinkExt, StreamExt};
use hl7_parser::Message;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::emission::SendOutcome;
use crate::wire::mllp::MllpCodec;

/// `endpoint` is a `host:port` string, resolved the way `TcpStream::connect`
/// already resolves any `ToSocketAddrs` value — no separate DNS step needed.
pub async fn send_and_await_ack(endpoint: &str, payload: &str, ack_timeout: std::time::Duration) -> SendOutcome {
    let stream = match TcpStream::connect(endpoint).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("failed to connect to MLLP subscriber {endpoint}: {e}");
            return SendOutcome::TransportFailure(e.to_string());
        }
    };

    let mut transport = Framed::new(stream, MllpCodec::default());

    if let Err(e) = transport.send(payload.to_string()).await {
        log::error!("failed to send MLLP frame to {endpoint}: {e}");
        return SendOutcome::TransportFailure(e.to_string());
    }

    let Some(frame) = timeout(ack_timeout, transport.next()).await.ok().flatten() else {
        log::warn!("timed out waiting for ACK from {endpoint}");
        return SendOutcome::Timeout;
    };

    let ack_text = match frame {
        Ok(text) => text,
        Err(e) => {
            log::error!("failed to decode ACK frame from {endpoint}: {e}");
            return SendOutcome::TransportFailure(e.to_string());
        }
    };

    if msa_is_accept(&ack_text) {
        SendOutcome::AckOk
    } else {
        SendOutcome::AckError(ack_text)
    }
}

fn msa_is_accept(ack_text: &str) -> bool {
    let Ok(ack) = Message::parse_with_lenient_newlines(ack_text, true) else {
        return false;
    };
    ack.segment("MSA")
        .and_then(|seg| seg.field(1))
        .map(|f| f.raw_value() == "AA")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msa_accept_recognizes_aa() {
        let ack = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01|1|P|2.5\rMSA|AA|1\r";
        assert!(msa_is_accept(ack));
    }

    #[test]
    fn msa_accept_rejects_ae() {
        let ack = "MSH|^~\\&|A|B|C|D|20240101000000||ACK^A01|1|P|2.5\rMSA|AE|1\r";
        assert!(!msa_is_accept(ack));
    }

    #[test]
    fn msa_accept_rejects_garbage() {
        assert!(!msa_is_accept("not hl7 at all"));
    }
}
