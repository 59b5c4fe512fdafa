//! Pre-recorded TS file input.
//!
//! A worker thread replays the file at its PCR-derived rate and hands
//! packets to the reactor over a bounded channel; the reactor forwards
//! them into the [`TsSink`] and periodically persists the resume
//! offset.

pub mod error;
pub mod pacer;
pub mod skip;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use input_common::{BitrateMeter, TsSink, WorkerHandle};
use mpegts::RawPacket;

pub use error::FileInputError;
use pacer::Pacer;
use skip::SkipFile;

/// Resume-offset persistence interval.
const SKIP_INTERVAL: Duration = Duration::from_secs(2);

/// Bitrate statistics interval.
const STAT_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration for one file input.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub filename: PathBuf,
    /// Optional path persisting the resume offset across restarts.
    #[serde(default)]
    pub lock: Option<PathBuf>,
}

/// A file input instance.
pub struct FileInput {
    worker: Option<WorkerHandle>,
    packets: mpsc::Receiver<RawPacket>,
    skip: Arc<AtomicU64>,
    skip_file: Option<SkipFile>,
    meter: BitrateMeter,
}

impl FileInput {
    /// Open the input: verify the file is readable, load any persisted
    /// resume offset, and start the pacing worker.
    pub fn open(config: &FileConfig) -> Result<Self, FileInputError> {
        std::fs::File::open(&config.filename).map_err(|source| FileInputError::Open {
            path: config.filename.clone(),
            source,
        })?;

        let skip_file = config.lock.clone().map(SkipFile::new);
        let skip = Arc::new(AtomicU64::new(
            skip_file.as_ref().map(|file| file.load()).unwrap_or(0),
        ));

        let (tx, packets) = mpsc::channel::<RawPacket>(pacer::RING_PACKETS);
        let mut worker_pacer = Pacer::new(config.filename.clone(), skip.clone());
        let worker = WorkerHandle::spawn("file-pacer", move |flag| {
            worker_pacer.run(flag, |ts| tx.blocking_send(*ts).is_ok());
        })?;

        info!(
            file = %config.filename.display(),
            resume_at = skip.load(Ordering::Relaxed),
            "file input open"
        );

        Ok(FileInput {
            worker: Some(worker),
            packets,
            skip,
            skip_file,
            meter: BitrateMeter::new("file"),
        })
    }

    pub fn bitrate_kbps(&self) -> u32 {
        self.meter.kbps()
    }

    /// Forward paced packets into the sink until the worker finishes
    /// (unreadable file) or the future is dropped.
    pub async fn run(&mut self, sink: &mut dyn TsSink) -> Result<(), FileInputError> {
        let mut housekeeping = tokio::time::interval(SKIP_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        housekeeping.tick().await;

        loop {
            tokio::select! {
                packet = self.packets.recv() => {
                    match packet {
                        Some(ts) => {
                            self.meter.account(ts.len());
                            sink.send_ts(&ts);
                        }
                        None => {
                            // worker exited: file gone and not reopenable
                            self.persist_skip();
                            return Ok(());
                        }
                    }
                }
                _ = housekeeping.tick() => {
                    self.persist_skip();
                    self.meter.tick(STAT_INTERVAL);
                }
            }
        }
    }

    fn persist_skip(&self) {
        if let Some(skip_file) = &self.skip_file {
            skip_file.store(self.skip.load(Ordering::Relaxed));
        }
    }
}

impl Drop for FileInput {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        while self.packets.try_recv().is_ok() {}
        self.persist_skip();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpegts::packet::{self, TS_PACKET_SIZE};
    use std::io::Write;

    fn make_stream(blocks: usize, per_block: usize, block_ms: u64) -> Vec<u8> {
        let mut out = Vec::new();
        for block in 0..=blocks {
            let mut ts = [0xFFu8; TS_PACKET_SIZE];
            ts[0] = 0x47;
            ts[1] = 0x1F;
            ts[2] = 0xFF;
            ts[3] = 0x30;
            ts[4] = 183;
            ts[5] = 0x00;
            packet::write_pcr(
                &mut ts,
                packet::Pcr::from_27mhz(block as u64 * block_ms * 27_000),
            );
            out.extend_from_slice(&ts);
            if block < blocks {
                let mut null = [0xFFu8; TS_PACKET_SIZE];
                null[0] = 0x47;
                null[1] = 0x1F;
                null[2] = 0xFF;
                null[3] = 0x10;
                for _ in 1..per_block {
                    out.extend_from_slice(&null);
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn test_open_missing_file_is_fatal() {
        let config = FileConfig {
            filename: PathBuf::from("/nonexistent/stream.ts"),
            lock: None,
        };
        assert!(matches!(
            FileInput::open(&config),
            Err(FileInputError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_packets_flow_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.ts");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&make_stream(6, 10, 10))
            .unwrap();

        let mut input = FileInput::open(&FileConfig {
            filename: path,
            lock: None,
        })
        .unwrap();

        let mut received = Vec::new();
        {
            let mut sink = |ts: &RawPacket| received.push(*ts);
            let _ = tokio::time::timeout(Duration::from_millis(300), input.run(&mut sink)).await;
        }

        assert!(!received.is_empty());
        for ts in &received {
            assert!(packet::is_sync(ts));
        }
    }

    #[tokio::test]
    async fn test_skip_persists_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.ts");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&make_stream(6, 10, 10))
            .unwrap();
        let lock = dir.path().join("stream.lock");

        let mut input = FileInput::open(&FileConfig {
            filename: path,
            lock: Some(lock.clone()),
        })
        .unwrap();
        // stop the worker first so the offset cannot move under us
        if let Some(mut worker) = input.worker.take() {
            worker.stop();
        }
        input.skip.store(188 * 42, Ordering::Relaxed);
        drop(input);

        assert_eq!(SkipFile::new(lock).load(), 188 * 42);
    }
}
