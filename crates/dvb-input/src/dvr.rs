//! Nonblocking reader for the DVR device ring buffer.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::warn;

use input_common::{BitrateMeter, TsSink};
use mpegts::TS_PACKET_SIZE;

use crate::error::DvbError;
use crate::sys::demux as dmx;

/// Read buffer: up to 1022 packets per drain.
const READ_PACKETS: usize = 1022;
const READ_BUFFER_SIZE: usize = READ_PACKETS * TS_PACKET_SIZE;

/// Backoff before retrying a failed reopen.
pub const REOPEN_RETRY: Duration = Duration::from_secs(5);

/// An opened `/dev/dvb/adapterA/dvrD`, registered with the reactor.
pub struct DvrReader {
    fd: AsyncFd<File>,
    buffer: Box<[u8]>,
    carry: usize,
}

impl DvrReader {
    /// Open the DVR device nonblocking and optionally resize the
    /// kernel ring buffer (`buffer_size` in 4 KiB units, 0 keeps the
    /// driver default). Must run inside the reactor.
    pub fn open(adapter: u32, device: u32, buffer_size: u32) -> Result<Self, DvbError> {
        let path = format!("/dev/dvb/adapter{adapter}/dvr{device}");
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| DvbError::DeviceOpen {
                device: path,
                source,
            })?;

        if buffer_size > 0 {
            let bytes = buffer_size * 4096;
            if let Err(errno) = dmx::set_buffer_size(file.as_raw_fd(), bytes) {
                warn!(%errno, "failed to set dvr ring buffer");
            }
        }

        let fd = AsyncFd::with_interest(file, Interest::READABLE)?;
        Ok(DvrReader {
            fd,
            buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            carry: 0,
        })
    }

    /// Wait for readability, drain one buffer, and forward whole
    /// packets to the sink. Returns the byte count; `Ok(0)` signals
    /// EOF and read errors are returned for the caller's reopen cycle.
    pub async fn pump(
        &mut self,
        sink: &mut dyn TsSink,
        meter: &mut BitrateMeter,
    ) -> std::io::Result<usize> {
        loop {
            let mut guard = self.fd.readable_mut().await?;
            match guard.try_io(|inner| {
                let carry = self.carry;
                inner.get_ref().read(&mut self.buffer[carry..])
            }) {
                Ok(Ok(0)) => return Ok(0),
                Ok(Ok(read)) => {
                    let filled = self.carry + read;
                    meter.account(read);
                    let whole = filled - (filled % TS_PACKET_SIZE);
                    for chunk in self.buffer[..whole].chunks_exact(TS_PACKET_SIZE) {
                        sink.send_ts(chunk.try_into().unwrap());
                    }
                    // a trailing partial packet stays for the next read
                    self.buffer.copy_within(whole..filled, 0);
                    self.carry = filled - whole;
                    return Ok(read);
                }
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => continue,
            }
        }
    }
}
