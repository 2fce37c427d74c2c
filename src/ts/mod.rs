//! # MPEG Transport Stream (TS) Implementation
//!
//! This module provides a bidirectional MPEG-2 Transport Stream codec:
//!
//! - TS packet parsing and generation, including adaptation fields and PCR
//! - Program Specific Information (PSI) tables: PAT, PMT, and SCTE-35
//! - Packetized Elementary Stream (PES) handling with PTS/DTS
//! - Demuxing with per-PID PES reassembly and timestamp rollover correction
//! - Muxing from declared programs and media samples
//!
//! ## Example Usage
//!
//! ### Muxing samples and demuxing them back
//!
//! ```rust
//! use tsio::ts::demuxer::{Demuxer, Payload};
//! use tsio::ts::muxer::{Muxer, SampleOptions, StreamOptions};
//!
//! # fn main() -> tsio::Result<()> {
//! let mut muxer = Muxer::new();
//! let video_pid = muxer.add_elementary_stream(0x1B, StreamOptions::default())?;
//!
//! let mut stream = muxer.mux_pat()?;
//! stream.extend_from_slice(&muxer.mux_pmt()?);
//! stream.extend_from_slice(&muxer.mux_sample(
//!     video_pid,
//!     b"a video access unit",
//!     33_000_000,
//!     SampleOptions::default(),
//! )?);
//!
//! let mut demuxer = Demuxer::new();
//! let mut containers = demuxer.push(&stream)?;
//! containers.extend(demuxer.flush()?);
//!
//! let pes = containers
//!     .iter()
//!     .find_map(|c| match &c.payload {
//!         Payload::Pes(pes) => Some(pes),
//!         _ => None,
//!     })
//!     .expect("one video PES comes back out");
//! assert_eq!(&pes.data[..], b"a video access unit");
//! assert_eq!(pes.pts, Some(33_000_000));
//! # Ok(())
//! # }
//! ```

/// Per-PID reassembly of partial PES fragments
pub mod aggregator;

/// Conversions between the 90 kHz / 27 MHz wire clocks and nanoseconds
pub mod clock;

/// TS demuxer: byte chunks in, containers out
pub mod demuxer;

/// TS muxer: declared streams and samples in, TS bytes out
pub mod muxer;

/// Low-level TS packet decoding
pub mod parser;

/// PES packet codec
pub mod pes;

/// PSI section framing and table dispatch
pub mod psi;

/// SCTE-35 splice information sections
pub mod scte35;

/// Core TS types and constants
pub mod types;

// Re-export commonly used types and constants
pub use aggregator::StreamAggregator;
pub use demuxer::{Container, Demuxer, DemuxerOptions, Payload};
pub use muxer::{Muxer, SampleOptions, StreamOptions};
pub use pes::{PartialPes, Pes};
pub use psi::{Psi, PsiSyntax, Table, TableType};
pub use scte35::{SpliceCommand, SpliceInfoSection, SpliceInsert};
pub use types::{
    Pat, PidClass, Pmt, PmtStream, Scrambling, StreamCategory, StreamType, TsPacket, PID_NULL,
    PID_PAT, TS_PACKET_SIZE,
};
