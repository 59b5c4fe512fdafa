//! Shared plumbing for TS input modules.
//!
//! Every input (tuner, file) produces the same thing: a stream of
//! 188-byte TS packets pushed into a [`TsSink`]. This crate holds that
//! seam plus the pieces both inputs need around their worker threads:
//! the cooperative [`RunFlag`], the joining [`WorkerHandle`], and the
//! [`BitrateMeter`] used for periodic throughput reporting.

mod bitrate;
mod worker;

pub use bitrate::BitrateMeter;
pub use worker::{RunFlag, WorkerHandle};

use mpegts::RawPacket;

/// Downstream consumer of TS packets, one 188-byte packet per call,
/// sync byte at offset 0.
pub trait TsSink {
    fn send_ts(&mut self, packet: &RawPacket);
}

impl<F> TsSink for F
where
    F: FnMut(&RawPacket),
{
    fn send_ts(&mut self, packet: &RawPacket) {
        self(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_sink() {
        let mut seen = 0u32;
        {
            let mut sink = |_: &RawPacket| seen += 1;
            let ts = [0u8; 188];
            sink.send_ts(&ts);
            sink.send_ts(&ts);
        }
        assert_eq!(seen, 2);
    }
}
