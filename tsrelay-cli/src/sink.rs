//! The downstream end of the pipeline: raw TS to stdout or a file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use tracing::warn;

use input_common::TsSink;
use mpegts::RawPacket;

use crate::config::OutputConfig;

pub struct OutputSink {
    writer: BufWriter<Box<dyn Write + Send>>,
    write_failed: bool,
}

impl OutputSink {
    pub fn open(config: &OutputConfig) -> anyhow::Result<Self> {
        let writer: Box<dyn Write + Send> = match config.path.as_deref() {
            None => Box::new(io::stdout()),
            Some(path) if path == Path::new("-") => Box::new(io::stdout()),
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("failed to create output {}", path.display()))?,
            ),
        };
        Ok(OutputSink {
            writer: BufWriter::new(writer),
            write_failed: false,
        })
    }
}

impl TsSink for OutputSink {
    fn send_ts(&mut self, packet: &RawPacket) {
        if let Err(err) = self.writer.write_all(packet) {
            if !self.write_failed {
                warn!(%err, "output write failed, dropping packets");
                self.write_failed = true;
            }
        } else {
            self.write_failed = false;
        }
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
