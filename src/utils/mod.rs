//! # Utility Functions and Types
//!
//! This module provides common utility functions and types used throughout the tsio library.
//! It includes implementations for:
//!
//! - Bit-level reading of MSB-first fields
//! - CRC-32/MPEG-2 calculation for PSI sections
//!
//! ## Bit Operations
//!
//! ```rust
//! use tsio::utils::BitReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = [0b1011_0011u8];
//! let mut reader = BitReader::new(&data);
//!
//! assert!(reader.read_bool()?);
//! assert_eq!(reader.read_bits(3)?, 0b011);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use tsio::utils::Crc32Mpeg2;
//!
//! let crc = Crc32Mpeg2::new();
//! assert_eq!(crc.calculate(b"123456789"), 0x0376_E6E7);
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

// Re-export commonly used types
pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
