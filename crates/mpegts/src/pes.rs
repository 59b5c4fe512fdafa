//! PES packet reassembly and segmentation over TS packets.

use tracing::debug;

use crate::error::TsError;
use crate::packet::{self, RawPacket, TS_BODY_SIZE, TS_HEADER_SIZE, TS_PACKET_SIZE};

/// Maximum PES packet length: 6-byte header + 16-bit length field.
pub const PES_MAX_SIZE: usize = 0xFFFF + 6;

/// Fixed PES header size up to and including header_data_length.
const PES_HEADER_SIZE: usize = 9;

/// Declared total length of the PES packet starting at `buf`.
#[inline]
fn pes_len(buf: &[u8]) -> usize {
    6 + ((buf[4] as usize) << 8 | buf[5] as usize)
}

/// Coarse stream class derived from the PMT stream_type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesClass {
    Video,
    Audio,
    Sub,
    Data,
}

impl PesClass {
    pub fn from_stream_type(stream_type: u8) -> Self {
        match stream_type {
            0x01  // MPEG-1 video
            | 0x02 // MPEG-2 video
            | 0x80 // MPEG-2 MOTO video
            | 0x10 // MPEG-4 video
            | 0x1B // H.264 video
            | 0xA0 => PesClass::Video,
            0x03  // MPEG-1 audio
            | 0x04 // MPEG-2 audio
            | 0x11 // MPEG-4 audio (LATM)
            | 0x0F // ADTS audio
            | 0x81 // A52 audio
            | 0x83 // LPCM audio
            | 0x84 // SDDS audio
            | 0x85 // DTS audio
            | 0x87 // E-AC3
            | 0x91 // A52 vls audio
            | 0x94 => PesClass::Audio,
            0x82 | 0x92 => PesClass::Sub, // DVB SPU
            _ => PesClass::Data,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PesClass::Video => "VIDEO",
            PesClass::Audio => "AUDIO",
            PesClass::Sub => "SUB",
            PesClass::Data => "DATA",
        }
    }
}

/// Reassembly/segmentation context for PES packets on one PID.
///
/// Mirrors [`crate::psi::PsiPacket`] with PES framing: no pointer
/// field, a 16-bit declared length at bytes 4..6, and adaptation-field
/// stuffing on the final segmented packet. PES packets with a declared
/// length of zero (unbounded video) are rejected by this context.
pub struct PesPacket {
    pid: u16,
    cc: u8,
    stream_id: u8,
    pts: u64,
    buffer: Box<[u8; PES_MAX_SIZE]>,
    buffer_size: usize,
    buffer_skip: usize,
    ts: RawPacket,
}

impl PesPacket {
    pub fn new(pid: u16) -> Self {
        PesPacket {
            pid,
            cc: 0,
            stream_id: 0,
            pts: 0,
            buffer: Box::new([0u8; PES_MAX_SIZE]),
            buffer_size: 0,
            buffer_skip: 0,
            ts: [0u8; TS_PACKET_SIZE],
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn cc(&self) -> u8 {
        self.cc
    }

    pub fn set_cc(&mut self, cc: u8) {
        self.cc = cc & 0x0F;
    }

    pub fn stream_id(&self) -> u8 {
        self.stream_id
    }

    pub fn set_stream_id(&mut self, stream_id: u8) {
        self.stream_id = stream_id;
    }

    /// 90 kHz presentation timestamp attached to packets built with
    /// [`add_data`](Self::add_data). Zero means none.
    pub fn set_pts(&mut self, pts: u64) {
        self.pts = pts;
    }

    /// The assembled PES packet bytes.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.buffer_size]
    }

    pub fn len(&self) -> usize {
        self.buffer_size
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_size == 0
    }

    pub fn reset(&mut self) {
        self.buffer_size = 0;
        self.buffer_skip = 0;
    }

    /// Stage a complete PES packet for `demux`.
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), TsError> {
        if data.len() <= 6 || data.len() > PES_MAX_SIZE {
            return Err(TsError::PesOutOfRange(data.len()));
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.buffer_size = data.len();
        self.buffer_skip = 0;
        Ok(())
    }

    /// Feed one TS packet into the reassembler.
    pub fn mux<F>(&mut self, ts: &RawPacket, mut on_packet: F)
    where
        F: FnMut(&PesPacket),
    {
        let cc = packet::cc(ts);
        if !packet::has_payload(ts) {
            return;
        }

        let off = packet::payload_offset(ts);
        if off >= TS_PACKET_SIZE {
            return;
        }

        if packet::is_pusi(ts) {
            self.buffer_size = 0;

            if off + 6 > TS_PACKET_SIZE {
                // no room for a PES header
                return;
            }
            let total = pes_len(&ts[off..]);
            if total <= 6 || total > PES_MAX_SIZE {
                // declared length 0 (unbounded) lands here as well
                debug!(pid = self.pid, total, "unsupported PES length");
                return;
            }

            let avail = TS_PACKET_SIZE - off;
            if avail > TS_BODY_SIZE {
                return;
            }

            self.buffer_size = total;
            if total > avail {
                self.buffer[..avail].copy_from_slice(&ts[off..]);
                self.buffer_skip = avail;
            } else {
                self.buffer[..total].copy_from_slice(&ts[off..off + total]);
                self.buffer_skip = 0;
                on_packet(&*self);
            }
        } else {
            if self.buffer_skip == 0 {
                return;
            }
            if ((self.cc + 1) & 0x0F) != cc {
                debug!(pid = self.pid, "discontinuity, PES dropped");
                self.buffer_skip = 0;
                return;
            }
            let skip = self.buffer_skip;
            let body_len = TS_PACKET_SIZE - off;
            let remain = self.buffer_size - skip;
            if remain <= body_len {
                self.buffer[skip..skip + remain].copy_from_slice(&ts[off..off + remain]);
                self.buffer_skip = 0;
                on_packet(&*self);
            } else {
                self.buffer[skip..skip + body_len].copy_from_slice(&ts[off..]);
                self.buffer_skip += body_len;
            }
        }

        self.cc = cc;
    }

    /// Emit the staged PES packet as TS packets.
    ///
    /// The 16-bit length field is patched from the staged size. The
    /// first packet carries the PUSI bit; once the remaining tail no
    /// longer fills a packet body an adaptation field of exactly the
    /// padding size is inserted (length byte, zero flags byte, 0xFF
    /// fill). The continuity counter advances by one per packet.
    pub fn demux<F>(&mut self, mut on_packet: F)
    where
        F: FnMut(&RawPacket),
    {
        let buffer_size = self.buffer_size;
        if buffer_size == 0 {
            return;
        }

        let es_len = (buffer_size - 6) as u16;
        self.buffer[4] = (es_len >> 8) as u8;
        self.buffer[5] = es_len as u8;

        self.ts[0] = 0x47;
        self.ts[1] = 0x40 | (self.pid >> 8) as u8;
        self.ts[2] = (self.pid & 0xFF) as u8;

        let mut ts_skip = TS_HEADER_SIZE;
        let mut ts_size = TS_BODY_SIZE;
        let mut buffer_skip = 0usize;

        while buffer_skip < buffer_size {
            let tail = buffer_size - buffer_skip;
            if tail < ts_size {
                let af_size = ts_size - tail;
                self.ts[3] = 0x30 | self.cc;
                self.ts[4] = (af_size - 1) as u8;
                if af_size >= 2 {
                    self.ts[5] = 0x00;
                    self.ts[TS_HEADER_SIZE + 2..TS_HEADER_SIZE + af_size].fill(0xFF);
                }
                ts_skip = TS_HEADER_SIZE + af_size;
                ts_size = tail;
            } else {
                self.ts[3] = 0x10 | self.cc;
            }

            self.ts[ts_skip..ts_skip + ts_size]
                .copy_from_slice(&self.buffer[buffer_skip..buffer_skip + ts_size]);

            buffer_skip += ts_size;
            self.cc = (self.cc + 1) & 0x0F;

            on_packet(&self.ts);

            self.ts[1] &= !0x40;
        }
    }

    /// Append payload to a PES packet under construction.
    ///
    /// The first append lays down the fixed header
    /// `00 00 01 <stream_id> ?? ?? 00 00 00` (length patched on demux);
    /// a nonzero PTS sets flag 0x80 in byte 7 and reserves five more
    /// header bytes. An append that would exceed the PES maximum is
    /// dropped silently; callers detect the truncation via [`len`](Self::len).
    pub fn add_data(&mut self, data: &[u8]) {
        if self.buffer_size == 0 {
            let b = &mut self.buffer[..PES_HEADER_SIZE];
            b[0] = 0x00;
            b[1] = 0x00;
            b[2] = 0x01;
            b[3] = self.stream_id;
            b[6] = 0x00;
            b[7] = 0x00;
            b[8] = 0x00;
            self.buffer_size = PES_HEADER_SIZE;

            if self.pts != 0 {
                self.buffer[7] |= 0x80;
                self.buffer_size += 5;
            }
        }

        let nsize = self.buffer_size + data.len();
        if nsize > PES_MAX_SIZE {
            return;
        }

        self.buffer[self.buffer_size..nsize].copy_from_slice(data);
        self.buffer_size = nsize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet;

    /// Build a PES packet with the given elementary-stream payload size.
    fn make_pes(stream_id: u8, es_size: usize) -> Vec<u8> {
        let mut p = vec![0u8; 6 + es_size];
        p[2] = 0x01;
        p[3] = stream_id;
        p[4] = (es_size >> 8) as u8;
        p[5] = es_size as u8;
        for (i, b) in p[6..].iter_mut().enumerate() {
            *b = (i % 253) as u8;
        }
        p
    }

    fn segment(pid: u16, cc: u8, pes: &[u8]) -> Vec<RawPacket> {
        let mut ctx = PesPacket::new(pid);
        ctx.set_cc(cc);
        ctx.set_data(pes).unwrap();
        let mut out = Vec::new();
        ctx.demux(|ts| out.push(*ts));
        out
    }

    #[test]
    fn test_roundtrip_400_bytes() {
        // 400-byte PES, CC starting at 7: 3 packets, CC 7 8 9,
        // PUSI on the first, AF stuffing on the last
        let pes = make_pes(0xE0, 400 - 6);
        let packets = segment(0x100, 7, &pes);
        assert_eq!(packets.len(), 3);

        assert!(packet::is_pusi(&packets[0]));
        assert!(!packet::is_pusi(&packets[1]));
        assert!(!packet::is_pusi(&packets[2]));
        assert_eq!(packet::cc(&packets[0]), 7);
        assert_eq!(packet::cc(&packets[1]), 8);
        assert_eq!(packet::cc(&packets[2]), 9);

        assert_eq!(packet::af_bits(&packets[0]), 0x10);
        assert_eq!(packet::af_bits(&packets[1]), 0x10);
        assert_eq!(packet::af_bits(&packets[2]), 0x30);
        // 400 = 184 + 184 + 32 payload bytes; AF fills the rest
        let af_size = TS_BODY_SIZE - 32;
        assert_eq!(packets[2][4] as usize, af_size - 1);
        assert_eq!(packets[2][5], 0x00);
        assert!(packets[2][6..TS_HEADER_SIZE + af_size].iter().all(|&b| b == 0xFF));

        for ts in &packets {
            assert!(packet::is_sync(ts));
            assert_eq!(packet::pid(ts), 0x100);
        }

        let mut ctx = PesPacket::new(0x100);
        let mut got = Vec::new();
        for ts in &packets {
            ctx.mux(ts, |p| got.push(p.data().to_vec()));
        }
        assert_eq!(got, vec![pes]);
    }

    #[test]
    fn test_roundtrip_single_packet() {
        let pes = make_pes(0xC0, 100);
        let packets = segment(0x101, 0, &pes);
        assert_eq!(packets.len(), 1);

        let mut ctx = PesPacket::new(0x101);
        let mut got = Vec::new();
        ctx.mux(&packets[0], |p| got.push(p.data().to_vec()));
        assert_eq!(got, vec![pes]);
    }

    #[test]
    fn test_roundtrip_max_size() {
        let pes = make_pes(0xE0, 0xFFFF);
        assert_eq!(pes.len(), PES_MAX_SIZE);
        let packets = segment(0x102, 3, &pes);

        let mut ctx = PesPacket::new(0x102);
        let mut got = Vec::new();
        for ts in &packets {
            ctx.mux(ts, |p| got.push(p.data().to_vec()));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], pes);
    }

    #[test]
    fn test_exact_body_multiple_no_stuffing() {
        // 368 = 2 * 184: no adaptation field anywhere
        let pes = make_pes(0xE0, 368 - 6);
        let packets = segment(0x103, 0, &pes);
        assert_eq!(packets.len(), 2);
        assert_eq!(packet::af_bits(&packets[0]), 0x10);
        assert_eq!(packet::af_bits(&packets[1]), 0x10);
    }

    #[test]
    fn test_tail_of_183_gets_one_byte_af() {
        // second packet carries 183 payload bytes behind a
        // zero-length adaptation field header
        let pes = make_pes(0xE0, 184 + 183 - 6);
        let packets = segment(0x104, 0, &pes);
        assert_eq!(packets.len(), 2);
        assert_eq!(packet::af_bits(&packets[1]), 0x30);
        assert_eq!(packets[1][4], 0);

        let mut ctx = PesPacket::new(0x104);
        let mut got = Vec::new();
        for ts in &packets {
            ctx.mux(ts, |p| got.push(p.data().to_vec()));
        }
        assert_eq!(got, vec![pes]);
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut pes = make_pes(0xE0, 200);
        pes[4] = 0;
        pes[5] = 0; // declared length 0: unbounded, unsupported
        let mut ts = [0xFFu8; TS_PACKET_SIZE];
        ts[0] = 0x47;
        ts[1] = 0x41;
        ts[2] = 0x05;
        ts[3] = 0x10;
        ts[TS_HEADER_SIZE..].copy_from_slice(&pes[..TS_BODY_SIZE]);

        let mut ctx = PesPacket::new(0x105);
        let mut count = 0;
        ctx.mux(&ts, |_| count += 1);
        assert_eq!(count, 0);
        // and nothing is staged for continuation
        let mut cont = ts;
        cont[1] = 0x01;
        cont[3] = 0x11;
        ctx.mux(&cont, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_discontinuity_drops_packet() {
        let pes = make_pes(0xE0, 600);
        let packets = segment(0x106, 0, &pes);
        assert!(packets.len() >= 3);

        let mut ctx = PesPacket::new(0x106);
        let mut count = 0;
        ctx.mux(&packets[0], |_| count += 1);
        ctx.mux(&packets[2], |_| count += 1); // CC skips by 2
        assert_eq!(count, 0);

        let retransmit = segment(0x106, 4, &pes);
        let mut got = Vec::new();
        for ts in &retransmit {
            ctx.mux(ts, |p| got.push(p.data().to_vec()));
        }
        assert_eq!(got, vec![pes]);
    }

    #[test]
    fn test_mux_skips_adaptation_field() {
        let pes = make_pes(0xE0, 100);
        // single AF-bearing packet carrying the whole PES
        let mut ts = [0xFFu8; TS_PACKET_SIZE];
        ts[0] = 0x47;
        ts[1] = 0x41;
        ts[2] = 0x07;
        ts[3] = 0x30;
        let af_size = TS_BODY_SIZE - pes.len();
        ts[4] = (af_size - 1) as u8;
        ts[5] = 0x00;
        ts[TS_HEADER_SIZE + af_size..].copy_from_slice(&pes);

        let mut ctx = PesPacket::new(0x107);
        let mut got = Vec::new();
        ctx.mux(&ts, |p| got.push(p.data().to_vec()));
        assert_eq!(got, vec![pes]);
    }

    #[test]
    fn test_add_data_header() {
        let mut ctx = PesPacket::new(0x108);
        ctx.set_stream_id(0xBD);
        ctx.add_data(&[0xAA, 0xBB, 0xCC]);
        let d = ctx.data();
        assert_eq!(&d[..4], &[0x00, 0x00, 0x01, 0xBD]);
        assert_eq!(d[7], 0x00);
        assert_eq!(&d[9..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_add_data_with_pts_reserves_header_room() {
        let mut ctx = PesPacket::new(0x109);
        ctx.set_stream_id(0xE0);
        ctx.set_pts(90_000);
        ctx.add_data(&[0x01]);
        let d = ctx.data();
        assert_eq!(d[7] & 0x80, 0x80);
        assert_eq!(d.len(), 9 + 5 + 1);
    }

    #[test]
    fn test_add_data_truncates_at_max() {
        let mut ctx = PesPacket::new(0x10A);
        ctx.set_stream_id(0xE0);
        let chunk = vec![0u8; 60_000];
        ctx.add_data(&chunk);
        let before = ctx.len();
        ctx.add_data(&chunk); // would exceed the maximum
        assert_eq!(ctx.len(), before);
    }

    #[test]
    fn test_pes_class_mapping() {
        assert_eq!(PesClass::from_stream_type(0x1B), PesClass::Video);
        assert_eq!(PesClass::from_stream_type(0x0F), PesClass::Audio);
        assert_eq!(PesClass::from_stream_type(0x82), PesClass::Sub);
        assert_eq!(PesClass::from_stream_type(0x06), PesClass::Data);
        assert_eq!(PesClass::from_stream_type(0x1B).name(), "VIDEO");
    }
}
