//! MPEG-2 Transport Stream primitives and packetizers.
//!
//! This crate provides the 188-byte TS packet accessors, the MPEG-2
//! CRC-32, PCR decoding, and the two packetization contexts every
//! demultiplexer and remultiplexer in the pipeline is built on:
//! PSI section reassembly/segmentation ([`PsiPacket`]) and PES packet
//! reassembly/segmentation ([`PesPacket`]).

pub mod crc32;
pub mod error;
pub mod packet;
pub mod pes;
pub mod psi;

pub use crc32::mpeg2_crc32;
pub use error::TsError;
pub use packet::{
    PID_CAT, PID_FULL_BAND, PID_NULL, PID_PAT, Pcr, RawPacket, TS_BODY_SIZE, TS_HEADER_SIZE,
    TS_PACKET_SIZE,
};
pub use pes::{PES_MAX_SIZE, PesClass, PesPacket};
pub use psi::{PSI_MAX_SIZE, PsiPacket};

/// Result type for TS operations
pub type Result<T> = std::result::Result<T, TsError>;
