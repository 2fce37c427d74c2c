//! # Error Types
//!
//! This module provides the error types used throughout the tsio library.
//! It defines a central error type `TsError` that covers every failure the
//! codec, demuxer, and muxer can produce.
//!
//! The variants form the stable failure surface of the library: lenient-mode
//! recovery in the demuxer reports the same variants through its warning
//! channel that strict mode returns as errors.

use thiserror::Error;

/// Primary error type for the tsio library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsError {
    /// Sync byte missing or structural failure in a 188-byte frame
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// A length field is inconsistent with the available bytes inside a valid frame
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The byte tail is shorter than one 188-byte frame; feed more input
    #[error("not enough data")]
    NotEnoughData,

    /// Reserved adaptation-field-control, scrambled PES, or a PID the demuxer cannot route
    #[error("unsupported packet: {0}")]
    UnsupportedPacket(String),

    /// PSI section header malformed
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A PES being finalised has fragments with conflicting stream ids
    #[error("conflicting stream ids within one PES")]
    MultiStreamId,

    /// An accumulated PES is shorter than its declared length
    #[error("PES size mismatch: declared {expected} bytes, accumulated {actual}")]
    SizeMismatch {
        /// Declared PES payload length
        expected: usize,
        /// Bytes actually accumulated
        actual: usize,
    },

    /// SCTE-35 section body parsing failed
    #[error("scte35 unmarshal error: {0}")]
    Scte35Unmarshal(String),

    /// SCTE-35 command type outside the known set
    #[error("unknown splice command type {0:#04x}")]
    UnknownSpliceType(u8),

    /// Muxer: a PID was declared twice
    #[error("duplicate pid {0:#06x}")]
    DuplicatePid(u16),

    /// Muxer: the stream type id is not in the authoritative table
    #[error("unknown stream type {0:#04x}")]
    UnknownStreamType(u8),

    /// Muxer: PCR requested on a PID that is not the PCR carrier
    #[error("pid is not flagged as the PCR carrier")]
    NotPcrPid,
}

/// A specialized Result type for tsio operations.
pub type Result<T> = std::result::Result<T, TsError>;
