//! Protocol definitions for pod communication.
//!
//! This module contains the low-level protocol types including:
//! - CRC16 checksums
//! - Response frame decoding and validation
//! - Command encoding
//! - The parameter table

pub mod checksum;
pub mod command;
pub mod frame;
pub mod params;

pub use checksum::{checksum, crc16, verify};
pub use command::Command;
pub use frame::{ACK, Frame, FrameDecoder, IDLE, NACK, RP_TAG, encode as encode_frame};
pub use params::{Param, ParamRef, ValueRule};
