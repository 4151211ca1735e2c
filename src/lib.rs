#![warn(rust_2018_idioms)]
#![allow(dead_code)]

//! Real-time RTP receive pipeline of a VoIP call monitor.
//!
//! The crate ingests an unordered, lossy stream of RTP packets and
//! produces a smooth, de-jittered playout stream per monitored flow:
//! RFC 3550 sequence validation, a reorder window with XOR forward
//! error correction, an adaptive jitter buffer, and an Opus/G.711 codec
//! engine with packet loss concealment.
//!
//! The entry point is [`session::Session`]: feed it demultiplexed UDP
//! payloads via `on_rtp_packet` and pull 20 ms PCM frames via
//! `next_playout_frame`.

pub mod config;
mod error;
pub mod jitter;
pub mod registry;
pub mod reorder;
pub mod session;
pub mod stats;
pub mod stream;

pub use config::{CodecParams, JitterConfig, SessionConfig};
pub use error::{Error, Result};
pub use registry::{Direction, FiveTuple, StreamId};
pub use session::Session;
pub use stats::{FinalStats, FrameKind, LastFrameType, PlayoutFrame, Stats, StreamStats};
pub use stream::PacketOutcome;
