use thiserror::Error;

/// Errors raised by the TS primitives and packetizers.
///
/// Continuity and framing violations seen on a live stream are not
/// errors: the packetizers recover from them locally by resetting the
/// reassembly context. This enum covers the hard rejections only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TsError {
    #[error("invalid TS packet size: {0} (expected 188)")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: {0:#04x}")]
    InvalidSyncByte(u8),

    #[error("PSI section length {0} out of range (4..=4096)")]
    SectionOutOfRange(usize),

    #[error("PES packet length {0} out of range (7..=65541)")]
    PesOutOfRange(usize),
}
