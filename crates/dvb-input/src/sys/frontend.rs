//! Frontend device types and ioctls (`linux/dvb/frontend.h`).

use std::fs::{File, OpenOptions};
use std::mem;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use bitflags::bitflags;
use nix::errno::Errno;
use nix::{ioctl_read, ioctl_write_int_bad, ioctl_write_ptr, request_code_none};

use crate::error::DvbError;
use crate::frontend::{DtvPair, FrontendIo, OfdmTune};
use crate::tune::{SecMiniCmd, SecTone, SecVoltage};

bitflags! {
    /// Frontend capabilities reported by `FE_GET_INFO`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeCaps: u32 {
        const CAN_INVERSION_AUTO = 0x1;
        const CAN_FEC_AUTO = 0x200;
        const CAN_QPSK = 0x400;
        const CAN_QAM_AUTO = 0x10000;
        const CAN_TRANSMISSION_MODE_AUTO = 0x20000;
        const CAN_BANDWIDTH_AUTO = 0x40000;
        const CAN_GUARD_INTERVAL_AUTO = 0x80000;
        const CAN_HIERARCHY_AUTO = 0x100000;
        const CAN_MULTISTREAM = 0x4000000;
        const CAN_TURBO_FEC = 0x8000000;
        /// 2nd generation modulation (DVB-S2, DVB-T2, DVB-C2)
        const CAN_2G_MODULATION = 0x10000000;
        const CAN_RECOVER = 0x40000000;
        const CAN_MUTE_TS = 0x80000000;
    }
}

bitflags! {
    /// Frontend status bits from `FE_READ_STATUS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FeStatus: u32 {
        const HAS_SIGNAL = 0x01;
        const HAS_CARRIER = 0x02;
        const HAS_VITERBI = 0x04;
        const HAS_SYNC = 0x08;
        const HAS_LOCK = 0x10;
        const TIMEDOUT = 0x20;
        const REINIT = 0x40;
    }
}

/// Legacy frontend type from `FE_GET_INFO`.
pub const FE_QPSK: u32 = 0; // DVB-S
pub const FE_QAM: u32 = 1; // DVB-C
pub const FE_OFDM: u32 = 2; // DVB-T

pub const INVERSION_AUTO: u32 = 2;
pub const FEC_AUTO: u32 = 9;

/// Delivery system identifiers for `DTV_DELIVERY_SYSTEM`.
pub const SYS_DVBC_ANNEX_A: u32 = 1;
pub const SYS_DVBT: u32 = 3;
pub const SYS_DVBS: u32 = 5;
pub const SYS_DVBS2: u32 = 6;
pub const SYS_DVBT2: u32 = 16;

/// DVBv5 property commands.
pub const DTV_TUNE: u32 = 1;
pub const DTV_CLEAR: u32 = 2;
pub const DTV_FREQUENCY: u32 = 3;
pub const DTV_MODULATION: u32 = 4;
pub const DTV_BANDWIDTH_HZ: u32 = 5;
pub const DTV_INVERSION: u32 = 6;
pub const DTV_SYMBOL_RATE: u32 = 8;
pub const DTV_INNER_FEC: u32 = 9;
pub const DTV_VOLTAGE: u32 = 10;
pub const DTV_TONE: u32 = 11;
pub const DTV_ROLLOFF: u32 = 13;
pub const DTV_DELIVERY_SYSTEM: u32 = 17;
pub const DTV_API_VERSION: u32 = 35;
pub const DTV_CODE_RATE_HP: u32 = 36;
pub const DTV_CODE_RATE_LP: u32 = 37;
pub const DTV_GUARD_INTERVAL: u32 = 38;
pub const DTV_TRANSMISSION_MODE: u32 = 39;
pub const DTV_HIERARCHY: u32 = 40;

/// Frontend properties and capabilities (`struct dvb_frontend_info`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FeInfo {
    pub name: [libc::c_char; 128],
    pub fe_type: u32,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub notifier_delay: u32,
    pub caps: u32,
}

impl Default for FeInfo {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

impl FeInfo {
    pub fn caps(&self) -> FeCaps {
        FeCaps::from_bits_truncate(self.caps)
    }
}

/// DiSEqC master command (`struct dvb_diseqc_master_cmd`).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DiseqcMasterCmd {
    pub msg: [u8; 6],
    pub len: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct QpskParams {
    pub symbol_rate: u32,
    pub fec_inner: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct QamParams {
    pub symbol_rate: u32,
    pub fec_inner: u32,
    pub modulation: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct OfdmParams {
    pub bandwidth: u32,
    pub code_rate_hp: u32,
    pub code_rate_lp: u32,
    pub constellation: u32,
    pub transmission_mode: u32,
    pub guard_interval: u32,
    pub hierarchy_information: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union FeParamsUnion {
    pub qpsk: QpskParams,
    pub qam: QamParams,
    pub ofdm: OfdmParams,
    pub raw: [u8; 28],
}

/// Legacy tuning parameters (`struct dvb_frontend_parameters`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FeParameters {
    pub frequency: u32,
    pub inversion: u32,
    pub u: FeParamsUnion,
}

impl Default for FeParameters {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

/// Frontend event (`struct dvb_frontend_event`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FeEvent {
    pub status: u32,
    pub parameters: FeParameters,
}

impl Default for FeEvent {
    fn default() -> Self {
        unsafe { mem::zeroed() }
    }
}

/// One DVBv5 property (`struct dtv_property`). The 56-byte payload
/// union is reduced to the u32 `data` member used for set requests.
#[repr(C, packed)]
pub struct DtvProperty {
    pub cmd: u32,
    reserved: [u32; 3],
    pub data: u32,
    padding: [u8; 52],
    pub result: i32,
}

impl DtvProperty {
    pub fn new(cmd: u32, data: u32) -> Self {
        DtvProperty {
            cmd,
            reserved: [0; 3],
            data,
            padding: [0; 52],
            result: 0,
        }
    }
}

/// Property list header (`struct dtv_properties`).
#[repr(C)]
pub struct DtvProperties {
    pub num: u32,
    pub props: *mut DtvProperty,
}

ioctl_read!(fe_get_info, b'o', 61, FeInfo);
ioctl_write_ptr!(fe_diseqc_send_master_cmd, b'o', 63, DiseqcMasterCmd);
ioctl_write_int_bad!(fe_diseqc_send_burst, request_code_none!(b'o', 65));
ioctl_write_int_bad!(fe_set_tone, request_code_none!(b'o', 66));
ioctl_write_int_bad!(fe_set_voltage, request_code_none!(b'o', 67));
ioctl_read!(fe_read_status, b'o', 69, u32);
ioctl_read!(fe_read_ber, b'o', 70, u32);
ioctl_read!(fe_read_signal_strength, b'o', 71, u16);
ioctl_read!(fe_read_snr, b'o', 72, u16);
ioctl_read!(fe_read_uncorrected_blocks, b'o', 73, u32);
ioctl_write_ptr!(fe_set_frontend, b'o', 76, FeParameters);
ioctl_read!(fe_get_event, b'o', 78, FeEvent);
ioctl_write_ptr!(fe_set_property, b'o', 82, DtvProperties);
ioctl_read!(fe_get_property, b'o', 83, DtvProperties);

/// An opened frontend device.
///
/// The device is owned by exactly one worker thread after open; only
/// that thread issues ioctls against it.
pub struct FrontendDevice {
    file: File,
}

impl FrontendDevice {
    pub fn open(adapter: u32, device: u32) -> Result<Self, DvbError> {
        let path = format!("/dev/dvb/adapter{adapter}/frontend{device}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| DvbError::DeviceOpen {
                device: path,
                source,
            })?;
        Ok(FrontendDevice { file })
    }

    pub fn info(&self) -> Result<FeInfo, Errno> {
        let mut info = FeInfo::default();
        unsafe { fe_get_info(self.file.as_raw_fd(), &mut info) }?;
        Ok(info)
    }

    /// Driver DVB API version as (major, minor).
    pub fn api_version(&self) -> Result<(u8, u8), Errno> {
        let mut prop = DtvProperty::new(DTV_API_VERSION, 0);
        let mut props = DtvProperties {
            num: 1,
            props: &mut prop,
        };
        unsafe { fe_get_property(self.file.as_raw_fd(), &mut props) }?;
        let version = prop.data;
        Ok(((version >> 8) as u8, version as u8))
    }
}

impl FrontendIo for FrontendDevice {
    fn set_tone(&mut self, tone: SecTone) -> Result<(), Errno> {
        unsafe { fe_set_tone(self.file.as_raw_fd(), tone as i32) }.map(drop)
    }

    fn set_voltage(&mut self, voltage: SecVoltage) -> Result<(), Errno> {
        unsafe { fe_set_voltage(self.file.as_raw_fd(), voltage as i32) }.map(drop)
    }

    fn diseqc_master_cmd(&mut self, msg: &[u8]) -> Result<(), Errno> {
        let mut cmd = DiseqcMasterCmd::default();
        cmd.msg[..msg.len()].copy_from_slice(msg);
        cmd.len = msg.len() as u8;
        unsafe { fe_diseqc_send_master_cmd(self.file.as_raw_fd(), &cmd) }.map(drop)
    }

    fn diseqc_burst(&mut self, burst: SecMiniCmd) -> Result<(), Errno> {
        unsafe { fe_diseqc_send_burst(self.file.as_raw_fd(), burst as i32) }.map(drop)
    }

    fn tune_qpsk(&mut self, freq_khz: u32, symbol_rate: u32, fec: u32) -> Result<(), Errno> {
        let mut params = FeParameters::default();
        params.frequency = freq_khz;
        params.inversion = INVERSION_AUTO;
        params.u.qpsk = QpskParams {
            symbol_rate,
            fec_inner: fec,
        };
        unsafe { fe_set_frontend(self.file.as_raw_fd(), &params) }.map(drop)
    }

    fn tune_ofdm(&mut self, tune: &OfdmTune) -> Result<(), Errno> {
        let mut params = FeParameters::default();
        params.frequency = tune.frequency_hz;
        params.inversion = INVERSION_AUTO;
        params.u.ofdm = OfdmParams {
            bandwidth: tune.bandwidth,
            code_rate_hp: FEC_AUTO,
            code_rate_lp: FEC_AUTO,
            constellation: tune.constellation,
            transmission_mode: tune.transmission_mode,
            guard_interval: tune.guard_interval,
            hierarchy_information: tune.hierarchy,
        };
        unsafe { fe_set_frontend(self.file.as_raw_fd(), &params) }.map(drop)
    }

    fn tune_qam(
        &mut self,
        freq_hz: u32,
        symbol_rate: u32,
        fec: u32,
        modulation: u32,
    ) -> Result<(), Errno> {
        let mut params = FeParameters::default();
        params.frequency = freq_hz;
        params.inversion = INVERSION_AUTO;
        params.u.qam = QamParams {
            symbol_rate,
            fec_inner: fec,
            modulation,
        };
        unsafe { fe_set_frontend(self.file.as_raw_fd(), &params) }.map(drop)
    }

    fn set_properties(&mut self, pairs: &[DtvPair]) -> Result<(), Errno> {
        let mut props: Vec<DtvProperty> = pairs
            .iter()
            .map(|p| DtvProperty::new(p.cmd, p.data))
            .collect();
        let header = DtvProperties {
            num: props.len() as u32,
            props: props.as_mut_ptr(),
        };
        unsafe { fe_set_property(self.file.as_raw_fd(), &header) }.map(drop)
    }

    fn drain_events(&mut self) {
        let mut event = FeEvent::default();
        while unsafe { fe_get_event(self.file.as_raw_fd(), &mut event) }.is_ok() {}
    }

    fn read_status(&mut self) -> Result<FeStatus, Errno> {
        let mut bits: u32 = 0;
        unsafe { fe_read_status(self.file.as_raw_fd(), &mut bits) }?;
        Ok(FeStatus::from_bits_truncate(bits))
    }

    fn read_signal(&mut self) -> Option<u16> {
        let mut value: u16 = 0;
        unsafe { fe_read_signal_strength(self.file.as_raw_fd(), &mut value) }
            .ok()
            .map(|_| value)
    }

    fn read_snr(&mut self) -> Option<u16> {
        let mut value: u16 = 0;
        unsafe { fe_read_snr(self.file.as_raw_fd(), &mut value) }
            .ok()
            .map(|_| value)
    }

    fn read_ber(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        unsafe { fe_read_ber(self.file.as_raw_fd(), &mut value) }
            .ok()
            .map(|_| value)
    }

    fn read_unc(&mut self) -> Option<u32> {
        let mut value: u32 = 0;
        unsafe { fe_read_uncorrected_blocks(self.file.as_raw_fd(), &mut value) }
            .ok()
            .map(|_| value)
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
