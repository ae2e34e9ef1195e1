//! Ridge integration test harness.
//!
//! Every test drives the engine through the loopback transport and checks
//! what reached the wire, which requests are alive, and where the stream
//! cursor stopped. No network or privileges needed:
//!
//!   cargo test --test integration

use bytes::Bytes;

use ridge_core::config::RmaConfig;
use ridge_core::wire::PktFlags;
use ridge_rma::loopback::{RecordingTransport, SentMessage};
use ridge_rma::{Capabilities, Connection, Engine};

mod atomics;
mod config;
mod gets;
mod noncontig;
mod rendezvous;
mod streaming;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Rank of the loopback peer.
pub const PEER: u32 = 1;

pub fn caps() -> Capabilities {
    Capabilities {
        eager_max_msg_size: 16_384,
        non_contiguous: true,
    }
}

pub fn connection(caps: Capabilities) -> Connection<RecordingTransport> {
    Connection::new(PEER, RecordingTransport::new(caps))
}

pub fn loopback() -> Connection<RecordingTransport> {
    connection(caps())
}

/// Engine with a given streaming budget and otherwise default settings.
pub fn engine_with_unit(stream_unit_bytes: usize) -> Engine {
    Engine::new(RmaConfig {
        stream_unit_bytes,
        ..RmaConfig::default()
    })
}

/// Everything the transport accepted so far.
pub fn sent(conn: &Connection<RecordingTransport>) -> Vec<SentMessage> {
    conn.with_transport(|t| t.sent().to_vec())
        .expect("connection lock")
}

/// Flags field of any header; it sits at bytes 2..4 in every shape.
pub fn header_flags(msg: &SentMessage) -> PktFlags {
    let h = msg.list.header();
    PktFlags::from_bits_truncate(u16::from_ne_bytes([h[2], h[3]]))
}

/// Unit offset from a streamed message's extended header.
pub fn stream_offset(msg: &SentMessage) -> Option<u64> {
    let ext = msg.list.ext()?;
    let bytes: [u8; 8] = ext.get(..8)?.try_into().ok()?;
    Some(u64::from_ne_bytes(bytes))
}

/// Bytes after the header and extended header.
pub fn payload(msg: &SentMessage) -> &[u8] {
    let skip = msg.list.header().len() + msg.list.ext().map_or(0, Bytes::len);
    &msg.wire[skip..]
}

pub fn f64_bytes(values: impl IntoIterator<Item = f64>) -> Bytes {
    values
        .into_iter()
        .flat_map(f64::to_ne_bytes)
        .collect::<Vec<u8>>()
        .into()
}

/// `n` doubles counting up from zero.
pub fn ramp(n: usize) -> Bytes {
    f64_bytes((0..n).map(|i| i as f64))
}
