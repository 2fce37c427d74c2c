#![doc(html_root_url = "https://docs.rs/tsio/0.1.0")]

//! # tsio - MPEG-2 Transport Stream Codec
//!
//! `tsio` is a bidirectional MPEG-2 Transport Stream (ISO/IEC 13818-1)
//! library for broadcast and streaming pipelines: it parses a continuous
//! byte stream of 188-byte TS packets into structured program, table, and
//! elementary-stream events, and emits the same structure back as a valid
//! TS byte stream.
//!
//! ## Features
//!
//! ### Demuxing
//! - Synchronisation onto 188-byte frames from arbitrarily sized chunks
//! - PAT/PMT discovery and per-PID routing
//! - PES reassembly with PTS/DTS in nanoseconds
//! - 33-bit timestamp rollover correction onto a monotonic timeline
//! - SCTE-35 splice_insert cues
//! - Lenient recovery with a structured warning channel, or strict failure
//!
//! ### Muxing
//! - Program declaration with automatic PID and PES stream-id assignment
//! - PES chunking into TS packets with adaptation fields and stuffing
//! - PAT/PMT/SCTE-35 section emission with CRC-32/MPEG-2
//! - PCR insertion on a designated carrier PID
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tsio = "0.1.0"
//! ```
//!
//! ### Demuxing a byte stream
//!
//! ```rust,no_run
//! use tsio::ts::demuxer::{Demuxer, Payload};
//!
//! fn main() -> tsio::Result<()> {
//!     let mut demuxer = Demuxer::new();
//!
//!     // feed chunks as they arrive from a socket or file
//!     let chunk: Vec<u8> = read_next_chunk();
//!     for container in demuxer.push(&chunk)? {
//!         match container.payload {
//!             Payload::Pes(pes) => {
//!                 println!("pid {} pts {:?} bytes {}", container.pid, pes.pts, pes.data.len());
//!             }
//!             Payload::Psi(psi) => {
//!                 println!("pid {} table {:?}", container.pid, psi.table_type);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! # fn read_next_chunk() -> Vec<u8> { Vec::new() }
//! ```
//!
//! ## Module Overview
//!
//! - `ts`: the codec itself, from the packet, PSI, PES, and SCTE-35 layers
//!   up to the demuxer and muxer state machines
//! - `error`: the `TsError` failure surface and `Result` alias
//! - `utils`: bit reading and CRC-32/MPEG-2
//!
//! The library performs no I/O and spawns no threads; a `Demuxer` or
//! `Muxer` is a plain value the caller owns and drives.

/// Error types and utilities
pub mod error;

/// The MPEG-2 Transport Stream codec
pub mod ts;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, TsError};
