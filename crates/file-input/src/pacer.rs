//! PCR-driven real-time replay of a TS file.
//!
//! The pacer reads the file through a ring of 1022 packets, slices it
//! into blocks bounded by PCR-bearing packets, and spreads each block
//! over its PCR-derived wall-clock duration with a feedback term that
//! corrects for scheduler drift. A short read loops back to the start
//! of the file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use input_common::RunFlag;
use mpegts::packet::{self, RawPacket, TS_PACKET_SIZE};

use crate::error::FileInputError;

/// Ring capacity in packets.
pub const RING_PACKETS: usize = 1022;
const RING_SIZE: usize = RING_PACKETS * TS_PACKET_SIZE;

/// Accepted per-block duration range in milliseconds; anything outside
/// is treated as a PCR discontinuity.
const BLOCK_MS_MIN: f64 = 1.0;
const BLOCK_MS_MAX: f64 = 100.0;

pub struct Pacer {
    path: PathBuf,
    file: Option<File>,
    /// Absolute file offset of the next ring refill, persisted by the
    /// reactor so playback resumes across restarts.
    skip: Arc<AtomicU64>,
    last_pcr: u64,
    data: Box<[u8]>,
    ptr: usize,
    end: usize,
}

impl Pacer {
    pub fn new(path: PathBuf, skip: Arc<AtomicU64>) -> Self {
        Pacer {
            path,
            file: None,
            skip,
            last_pcr: 0,
            data: vec![0u8; RING_SIZE].into_boxed_slice(),
            ptr: 0,
            end: 0,
        }
    }

    /// Open (or reopen) the file and prime the ring.
    ///
    /// On a reopen the skip offset resets to zero first, which is what
    /// loops playback back to the start of the file at EOF. After
    /// seeking, the ring is rotated so its first byte is a sync byte,
    /// then filled, and `ptr` lands on the first PCR-bearing packet;
    /// everything before it is discarded.
    fn open_file(&mut self) -> Result<(), FileInputError> {
        if self.file.take().is_some() {
            self.skip.store(0, Ordering::Relaxed);
        }

        let mut file = File::open(&self.path).map_err(|source| FileInputError::Open {
            path: self.path.clone(),
            source,
        })?;

        let skip = self.skip.load(Ordering::Relaxed);
        if skip > 0 {
            file.seek(SeekFrom::Start(skip))?;
        }

        // sync the file position on a 0x47 boundary
        let head = read_fill(&mut file, &mut self.data[..TS_PACKET_SIZE])?;
        if head < TS_PACKET_SIZE {
            return Err(FileInputError::NoSyncByte {
                path: self.path.clone(),
            });
        }
        let Some(sync_at) = memchr::memchr(0x47, &self.data[..TS_PACKET_SIZE]) else {
            return Err(FileInputError::NoSyncByte {
                path: self.path.clone(),
            });
        };
        self.data.copy_within(sync_at..TS_PACKET_SIZE, 0);
        let tail = TS_PACKET_SIZE - sync_at;

        let filled = read_fill(&mut file, &mut self.data[tail..])?;
        self.end = tail + filled;
        self.file = Some(file);

        // prime the clock from the first PCR
        let Some(first_pcr) = self.seek_pcr(0) else {
            self.file = None;
            return Err(FileInputError::NoPcr {
                path: self.path.clone(),
            });
        };
        self.ptr = first_pcr;
        self.last_pcr = self.packet_pcr(first_pcr);
        Ok(())
    }

    fn reopen_from_start(&mut self) -> bool {
        match self.open_file() {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "file input stopped");
                false
            }
        }
    }

    /// Next PCR-bearing packet strictly after `from`.
    fn seek_pcr(&self, from: usize) -> Option<usize> {
        let mut offset = from + TS_PACKET_SIZE;
        while offset + TS_PACKET_SIZE <= self.end {
            if packet::check_pcr(self.packet(offset)) {
                return Some(offset);
            }
            offset += TS_PACKET_SIZE;
        }
        None
    }

    fn packet(&self, offset: usize) -> &RawPacket {
        self.data[offset..offset + TS_PACKET_SIZE]
            .try_into()
            .unwrap()
    }

    fn packet_pcr(&self, offset: usize) -> u64 {
        packet::parse_pcr(self.packet(offset))
            .map(|pcr| pcr.as_27mhz())
            .unwrap_or(0)
    }

    /// Wall-clock duration of the block ending at `block_end`, in
    /// milliseconds; `None` marks a discontinuity.
    fn time_per_block(&mut self, block_end: usize) -> Option<f64> {
        let pcr = self.packet_pcr(block_end);
        let delta = pcr.wrapping_sub(self.last_pcr);
        self.last_pcr = pcr;

        let base = (delta / 300) as f64;
        let extension = (delta % 300) as f64;
        let dt = base / 90.0 + extension / 27_000.0;
        if !(BLOCK_MS_MIN..=BLOCK_MS_MAX).contains(&dt) {
            return None;
        }
        Some(dt)
    }

    /// Move the unconsumed tail to the front of the ring and refill
    /// from the file. Returns false on a short read (EOF).
    fn refill(&mut self) -> Result<bool, FileInputError> {
        self.data.copy_within(self.ptr..self.end, 0);
        self.end -= self.ptr;
        self.ptr = 0;

        let want = RING_SIZE - self.end;
        let file = self.file.as_mut().ok_or_else(|| FileInputError::Io(
            std::io::Error::other("file not open"),
        ))?;
        let got = read_fill(file, &mut self.data[self.end..])?;
        self.skip.fetch_add(got as u64, Ordering::Relaxed);
        self.end += got;
        Ok(got == want)
    }

    /// The replay loop. `emit` pushes one packet downstream and
    /// returns false when the receiver is gone.
    pub fn run<F>(&mut self, flag: RunFlag, mut emit: F)
    where
        F: FnMut(&RawPacket) -> bool,
    {
        if let Err(err) = self.open_file() {
            error!(%err, "file input failed to start");
            return;
        }

        let timing_start = Instant::now();
        let mut block_time_total = 0.0f64; // ms
        let mut accuracy = 0.0f64; // ms per packet, feedback term

        while flag.is_running() {
            let block_end = match self.seek_pcr(self.ptr) {
                Some(offset) => offset,
                None => {
                    match self.refill() {
                        Ok(true) => {}
                        Ok(false) => {
                            if !self.reopen_from_start() {
                                break;
                            }
                            continue;
                        }
                        Err(err) => {
                            error!(%err, "file read failed");
                            break;
                        }
                    }
                    match self.seek_pcr(self.ptr) {
                        Some(offset) => offset,
                        None => {
                            if !self.reopen_from_start() {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            let Some(block_time) = self.time_per_block(block_end) else {
                debug!("PCR discontinuity, skipping block");
                self.ptr = block_end;
                continue;
            };
            block_time_total += block_time;

            let tscount = ((block_end - self.ptr) / TS_PACKET_SIZE) as f64;
            let budget_ms = block_time + accuracy * tscount;
            let sleep_ns = (budget_ms * 1_000_000.0 / tscount).max(0.0) as u64;
            let per_packet = Duration::from_nanos(sleep_ns);

            while self.ptr < block_end {
                if !emit(self.packet(self.ptr)) {
                    return;
                }
                self.ptr += TS_PACKET_SIZE;
                std::thread::sleep(per_packet);
            }

            let elapsed_ms = timing_start.elapsed().as_secs_f64() * 1000.0;
            accuracy = (block_time_total - elapsed_ms) / tscount;
        }
    }
}

/// Read until the buffer is full or EOF; returns the byte count.
fn read_fill(file: &mut File, mut buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while !buffer.is_empty() {
        match file.read(buffer) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                buffer = &mut buffer[n..];
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn null_packet() -> RawPacket {
        let mut ts = [0xFFu8; TS_PACKET_SIZE];
        ts[0] = 0x47;
        ts[1] = 0x1F;
        ts[2] = 0xFF;
        ts[3] = 0x10;
        ts
    }

    fn pcr_packet(ticks_27mhz: u64) -> RawPacket {
        let mut ts = null_packet();
        ts[3] = 0x30;
        ts[4] = 183; // AF fills the packet
        ts[5] = 0x00;
        packet::write_pcr(&mut ts, packet::Pcr::from_27mhz(ticks_27mhz));
        ts
    }

    /// `blocks` blocks of `per_block` packets; each block ends at a
    /// PCR `block_ms` apart from the previous one.
    fn make_stream(blocks: usize, per_block: usize, block_ms: u64) -> Vec<u8> {
        let mut out = Vec::new();
        for block in 0..=blocks {
            out.extend_from_slice(&pcr_packet(block as u64 * block_ms * 27_000));
            if block < blocks {
                for _ in 1..per_block {
                    out.extend_from_slice(&null_packet());
                }
            }
        }
        out
    }

    fn write_stream(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn pacer_for(file: &NamedTempFile) -> Pacer {
        Pacer::new(file.path().to_path_buf(), Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn test_open_syncs_and_finds_first_pcr() {
        let stream = make_stream(4, 10, 20);
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);
        pacer.open_file().unwrap();

        // the first PCR packet is skipped by the search start, so ptr
        // lands on the second one (one block in)
        assert_eq!(pacer.ptr, 10 * TS_PACKET_SIZE);
        assert_eq!(pacer.last_pcr, 20 * 27_000);
        assert_eq!(pacer.ptr % TS_PACKET_SIZE, 0);
        assert!(pacer.ptr <= pacer.end);
    }

    #[test]
    fn test_open_rotates_to_sync_byte() {
        let stream = make_stream(4, 10, 20);
        let file = write_stream(&stream[100..]); // cut mid-packet
        let mut pacer = pacer_for(&file);
        pacer.open_file().unwrap();

        // every ring packet starts on a sync byte
        let mut offset = 0;
        while offset + TS_PACKET_SIZE <= pacer.end {
            assert_eq!(pacer.data[offset], 0x47);
            offset += TS_PACKET_SIZE;
        }
    }

    #[test]
    fn test_open_without_pcr_fails() {
        let mut stream = Vec::new();
        for _ in 0..20 {
            stream.extend_from_slice(&null_packet());
        }
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);
        assert!(matches!(
            pacer.open_file(),
            Err(FileInputError::NoPcr { .. })
        ));
    }

    #[test]
    fn test_block_timing() {
        let stream = make_stream(4, 10, 20);
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);
        pacer.open_file().unwrap();

        let block_end = pacer.seek_pcr(pacer.ptr).unwrap();
        assert_eq!(block_end - pacer.ptr, 10 * TS_PACKET_SIZE);
        let dt = pacer.time_per_block(block_end).unwrap();
        assert!((dt - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_discontinuity_rejected() {
        let mut stream = make_stream(2, 10, 20);
        // a block that jumps 5 seconds ahead
        stream.extend_from_slice(&null_packet().repeat(9));
        stream.extend_from_slice(&pcr_packet(10 * 27_000_000));
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);
        pacer.open_file().unwrap();

        let first = pacer.seek_pcr(pacer.ptr).unwrap();
        assert!(pacer.time_per_block(first).is_some());
        pacer.ptr = first;
        let second = pacer.seek_pcr(pacer.ptr).unwrap();
        assert!(pacer.time_per_block(second).is_none());
    }

    #[test]
    fn test_run_paces_in_real_time() {
        // 10 blocks of 50 packets, 10 ms apart: nominal 100 ms
        let stream = make_stream(10, 50, 10);
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);

        let flag = RunFlag::new();
        let stop = flag.clone();
        let mut emitted = 0usize;
        let started = Instant::now();
        pacer.run(flag, |ts| {
            assert!(packet::is_sync(ts));
            emitted += 1;
            if emitted >= 450 {
                stop.stop();
            }
            true
        });
        let elapsed = started.elapsed();

        assert!(emitted >= 450);
        // 9 paced blocks at 10 ms; allow generous scheduler slack
        assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(500), "{elapsed:?}");
    }

    #[test]
    fn test_loops_back_to_start_on_eof() {
        let stream = make_stream(3, 10, 20);
        let file = write_stream(&stream);
        let skip = Arc::new(AtomicU64::new(0));
        let mut pacer = Pacer::new(file.path().to_path_buf(), skip.clone());

        let flag = RunFlag::new();
        let stop = flag.clone();
        let total_packets = stream.len() / TS_PACKET_SIZE;
        let mut emitted = 0usize;
        pacer.run(flag, |_| {
            emitted += 1;
            if emitted >= total_packets * 2 {
                stop.stop();
            }
            true
        });

        // far more packets than the file holds: playback wrapped
        assert!(emitted >= total_packets * 2);
    }

    #[test]
    fn test_emit_false_stops_worker() {
        let stream = make_stream(3, 10, 20);
        let file = write_stream(&stream);
        let mut pacer = pacer_for(&file);

        let mut emitted = 0usize;
        pacer.run(RunFlag::new(), |_| {
            emitted += 1;
            false
        });
        assert_eq!(emitted, 1);
    }
}
