//! Demux device types and ioctls (`linux/dvb/dmx.h`).

use std::os::fd::RawFd;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::{ioctl_none, ioctl_write_int_bad, ioctl_write_ptr, request_code_none};

/// Demux input selector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmxInput {
    Frontend = 0,
    Dvr = 1,
}

/// Demux output selector.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmxOutput {
    Decoder = 0,
    Tap = 1,
    /// Multiplex into the logical DVR device
    TsTap = 2,
    TsdemuxTap = 3,
}

/// PES filter type; `Other` passes any PID.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmxPesType {
    Audio0 = 0,
    Video0 = 1,
    Teletext0 = 2,
    Subtitle0 = 3,
    Pcr0 = 4,
    Other = 20,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmxFlags: u32 {
        const CHECK_CRC = 1;
        const ONESHOT = 2;
        const IMMEDIATE_START = 4;
    }
}

/// PES filter parameters (`struct dmx_pes_filter_params`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DmxPesFilterParams {
    pub pid: u16,
    pub input: DmxInput,
    pub output: DmxOutput,
    pub pes_type: DmxPesType,
    pub flags: u32,
}

ioctl_none!(dmx_start, b'o', 41);
ioctl_none!(dmx_stop, b'o', 42);
ioctl_write_ptr!(dmx_set_pes_filter, b'o', 44, DmxPesFilterParams);
ioctl_write_int_bad!(dmx_set_buffer_size, request_code_none!(b'o', 45));

/// Apply a TS-tap PES filter for `pid` with immediate start.
pub fn set_pes_filter(fd: RawFd, pid: u16) -> Result<(), Errno> {
    let params = DmxPesFilterParams {
        pid,
        input: DmxInput::Frontend,
        output: DmxOutput::TsTap,
        pes_type: DmxPesType::Other,
        flags: DmxFlags::IMMEDIATE_START.bits(),
    };
    unsafe { dmx_set_pes_filter(fd, &params) }.map(drop)
}

pub fn start(fd: RawFd) -> Result<(), Errno> {
    unsafe { dmx_start(fd) }.map(drop)
}

pub fn stop(fd: RawFd) -> Result<(), Errno> {
    unsafe { dmx_stop(fd) }.map(drop)
}

/// Resize the kernel ring buffer, in bytes.
pub fn set_buffer_size(fd: RawFd, bytes: u32) -> Result<(), Errno> {
    unsafe { dmx_set_buffer_size(fd, bytes as i32) }.map(drop)
}
