//! Frontend control loop: tune dispatch, DiSEqC sequencing, the lock
//! monitor, and the worker→reactor message protocol.

use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use input_common::RunFlag;

use crate::sys::frontend::{
    DTV_BANDWIDTH_HZ, DTV_CLEAR, DTV_CODE_RATE_HP, DTV_CODE_RATE_LP, DTV_DELIVERY_SYSTEM,
    DTV_FREQUENCY, DTV_GUARD_INTERVAL, DTV_HIERARCHY, DTV_INNER_FEC, DTV_INVERSION,
    DTV_MODULATION, DTV_ROLLOFF, DTV_SYMBOL_RATE, DTV_TONE, DTV_TRANSMISSION_MODE, DTV_TUNE,
    DTV_VOLTAGE, FEC_AUTO, FeStatus, INVERSION_AUTO, SYS_DVBS2, SYS_DVBT,
};
use crate::tune::{
    CableParams, Polarization, SatParams, SecMiniCmd, SecTone, SecVoltage, TerrParams,
    TuneCommand,
};

/// Status poll cadence.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between retune attempts.
pub const RETUNE_INTERVAL: Duration = Duration::from_secs(5);

/// DiSEqC inter-command settle time.
const DISEQC_STEP_DELAY: Duration = Duration::from_millis(15);

/// Messages from the frontend worker to the reactor. Observed in
/// enqueue order; the status snapshot is read after dequeue so the
/// reader sees the state as of the send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeMessage {
    Lock,
    Retune,
    Error,
}

/// Failing tune or status step, by DVB ioctl name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeFault {
    pub step: &'static str,
    pub errno: i32,
}

/// Frontend status snapshot. Written only by the worker thread; the
/// reactor reads it after dequeuing the matching message.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FeSnapshot {
    pub bits: u32,
    pub lock: bool,
    pub signal_pct: u8,
    pub snr_pct: u8,
    pub ber: u32,
    pub unc: u32,
    pub last_fault: Option<FeFault>,
}

impl FeSnapshot {
    /// The five status flags rendered as the retune log string.
    pub fn flags(&self) -> String {
        let bits = FeStatus::from_bits_truncate(self.bits);
        let mut out = String::with_capacity(5);
        out.push(if bits.contains(FeStatus::HAS_SIGNAL) { 'S' } else { '_' });
        out.push(if bits.contains(FeStatus::HAS_CARRIER) { 'C' } else { '_' });
        out.push(if bits.contains(FeStatus::HAS_VITERBI) { 'V' } else { '_' });
        out.push(if bits.contains(FeStatus::HAS_SYNC) { 'Y' } else { '_' });
        out.push(if bits.contains(FeStatus::HAS_LOCK) { 'L' } else { '_' });
        out
    }
}

pub type SharedSnapshot = Arc<Mutex<FeSnapshot>>;

/// One DVBv5 property assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtvPair {
    pub cmd: u32,
    pub data: u32,
}

impl DtvPair {
    pub fn new(cmd: u32, data: u32) -> Self {
        DtvPair { cmd, data }
    }
}

/// Legacy OFDM tune parameters handed to the device layer (code rates
/// are always auto).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfdmTune {
    pub frequency_hz: u32,
    pub bandwidth: u32,
    pub constellation: u32,
    pub transmission_mode: u32,
    pub guard_interval: u32,
    pub hierarchy: u32,
}

/// The ioctl surface the worker drives. [`crate::sys::frontend::FrontendDevice`]
/// is the kernel implementation; tests substitute a recording mock.
pub trait FrontendIo {
    fn set_tone(&mut self, tone: SecTone) -> Result<(), Errno>;
    fn set_voltage(&mut self, voltage: SecVoltage) -> Result<(), Errno>;
    fn diseqc_master_cmd(&mut self, msg: &[u8]) -> Result<(), Errno>;
    fn diseqc_burst(&mut self, burst: SecMiniCmd) -> Result<(), Errno>;
    fn tune_qpsk(&mut self, freq_khz: u32, symbol_rate: u32, fec: u32) -> Result<(), Errno>;
    fn tune_ofdm(&mut self, tune: &OfdmTune) -> Result<(), Errno>;
    fn tune_qam(&mut self, freq_hz: u32, symbol_rate: u32, fec: u32, modulation: u32)
    -> Result<(), Errno>;
    fn set_properties(&mut self, pairs: &[DtvPair]) -> Result<(), Errno>;
    fn drain_events(&mut self);
    fn read_status(&mut self) -> Result<FeStatus, Errno>;
    fn read_signal(&mut self) -> Option<u16>;
    fn read_snr(&mut self) -> Option<u16>;
    fn read_ber(&mut self) -> Option<u32>;
    fn read_unc(&mut self) -> Option<u32>;
    /// Worker-side sleep; routed through the trait so sequences with
    /// mandatory settle times stay testable.
    fn delay(&mut self, duration: Duration);
}

#[derive(Debug)]
struct Fault {
    step: &'static str,
    errno: Errno,
}

fn step(name: &'static str) -> impl FnOnce(Errno) -> Fault {
    move |errno| Fault { step: name, errno }
}

/// The frontend worker. Owns the device for its whole lifetime and is
/// the only writer of the status snapshot.
pub struct FrontendWorker<IO> {
    io: IO,
    tune: TuneCommand,
    status: SharedSnapshot,
    tx: mpsc::UnboundedSender<FeMessage>,
    locked: bool,
}

impl<IO: FrontendIo> FrontendWorker<IO> {
    pub fn new(
        io: IO,
        tune: TuneCommand,
        status: SharedSnapshot,
        tx: mpsc::UnboundedSender<FeMessage>,
    ) -> Self {
        FrontendWorker {
            io,
            tune,
            status,
            tx,
            locked: false,
        }
    }

    /// Worker thread body: initial tune, then the status loop.
    pub fn run(mut self, flag: RunFlag) {
        self.tune();
        while flag.is_running() {
            self.io.delay(STATUS_INTERVAL);
            if !flag.is_running() {
                break;
            }
            if let Some(backoff) = self.poll_status() {
                self.io.delay(backoff);
            }
        }
    }

    /// Issue the tune command; failures are recorded in the snapshot
    /// and reported as an error message.
    pub fn tune(&mut self) {
        let command = self.tune;
        let result = match command {
            TuneCommand::S(ref params) => self.tune_sat(params, false),
            TuneCommand::S2(ref params) => self.tune_sat(params, true),
            TuneCommand::T(ref params) => self.tune_terr(params, false),
            TuneCommand::T2(ref params) => self.tune_terr(params, true),
            TuneCommand::C(ref params) => self.tune_cable(params),
        };
        if let Err(fault) = result {
            self.fail(fault);
        }
    }

    /// One status-loop turn. Returns the extra backoff to sleep when a
    /// retune was issued.
    pub fn poll_status(&mut self) -> Option<Duration> {
        let bits = match self.io.read_status() {
            Ok(bits) => bits,
            Err(errno) => {
                self.fail(Fault {
                    step: "FE_READ_STATUS",
                    errno,
                });
                return None;
            }
        };

        let signal = self.io.read_signal().unwrap_or(0);
        let snr = self.io.read_snr().unwrap_or(0);
        let ber = self.io.read_ber().unwrap_or(0);
        let unc = self.io.read_unc().unwrap_or(0);
        let lock = bits.contains(FeStatus::HAS_LOCK);

        {
            let mut status = self.status.lock();
            status.bits = bits.bits();
            status.lock = lock;
            status.signal_pct = ((signal as u32 * 100) / 0xFFFF) as u8;
            status.snr_pct = ((snr as u32 * 100) / 0xFFFF) as u8;
            status.ber = ber;
            status.unc = unc;
        }

        if !lock {
            self.locked = false;
            self.tune();
            let _ = self.tx.send(FeMessage::Retune);
            Some(RETUNE_INTERVAL - STATUS_INTERVAL)
        } else {
            if !self.locked {
                self.locked = true;
                let _ = self.tx.send(FeMessage::Lock);
            }
            None
        }
    }

    fn fail(&mut self, fault: Fault) {
        debug!(step = fault.step, errno = %fault.errno, "frontend step failed");
        self.status.lock().last_fault = Some(FeFault {
            step: fault.step,
            errno: fault.errno as i32,
        });
        self.locked = false;
        let _ = self.tx.send(FeMessage::Error);
    }

    fn tune_sat(&mut self, params: &SatParams, s2: bool) -> Result<(), Fault> {
        let band = params.band();

        let (voltage, tone) = if params.lnb_sharing {
            (SecVoltage::Off, SecTone::Off)
        } else {
            let voltage = match params.polarization {
                Polarization::Vertical => SecVoltage::V13,
                Polarization::Horizontal => SecVoltage::V18,
            };
            let tone = if band.hiband { SecTone::On } else { SecTone::Off };
            (voltage, tone)
        };

        if params.diseqc > 0 {
            self.diseqc_setup(params.diseqc, band.hiband, voltage, tone)?;
        }

        if !s2 {
            if params.diseqc == 0 {
                self.io.set_tone(tone).map_err(step("FE_SET_TONE"))?;
                self.io
                    .set_voltage(voltage)
                    .map_err(step("FE_SET_VOLTAGE"))?;
            }
            self.io
                .tune_qpsk(
                    band.intermediate_frequency,
                    params.symbol_rate,
                    params.fec as u32,
                )
                .map_err(step("FE_SET_FRONTEND"))?;
        } else {
            self.io
                .set_properties(&[DtvPair::new(DTV_CLEAR, 0)])
                .map_err(step("FE_SET_PROPERTY clear"))?;
            self.io.drain_events();
            let pairs = [
                DtvPair::new(DTV_DELIVERY_SYSTEM, SYS_DVBS2),
                DtvPair::new(DTV_FREQUENCY, band.intermediate_frequency),
                DtvPair::new(DTV_SYMBOL_RATE, params.symbol_rate),
                DtvPair::new(DTV_INNER_FEC, params.fec as u32),
                DtvPair::new(DTV_INVERSION, INVERSION_AUTO),
                DtvPair::new(DTV_VOLTAGE, voltage as u32),
                DtvPair::new(DTV_MODULATION, params.modulation as u32),
                DtvPair::new(DTV_ROLLOFF, params.rolloff as u32),
                DtvPair::new(DTV_TONE, tone as u32),
                DtvPair::new(DTV_TUNE, 0),
            ];
            self.io
                .set_properties(&pairs)
                .map_err(step("FE_SET_PROPERTY tune"))?;
        }

        Ok(())
    }

    /// The DiSEqC committed-switch sequence with 15 ms settle times.
    /// The first failing step aborts the tune.
    fn diseqc_setup(
        &mut self,
        port: u8,
        hiband: bool,
        voltage: SecVoltage,
        tone: SecTone,
    ) -> Result<(), Fault> {
        let index = 4 * (port - 1)
            | if hiband { 2 } else { 0 }
            | if voltage == SecVoltage::V18 { 1 } else { 0 };

        self.io.set_tone(SecTone::Off).map_err(step("FE_SET_TONE"))?;
        self.io
            .set_voltage(voltage)
            .map_err(step("FE_SET_VOLTAGE"))?;
        self.io.delay(DISEQC_STEP_DELAY);

        self.io
            .diseqc_master_cmd(&[0xE0, 0x10, 0x38, 0xF0 | index])
            .map_err(step("FE_DISEQC_SEND_MASTER_CMD"))?;
        self.io.delay(DISEQC_STEP_DELAY);

        let burst = if (index / 4) % 2 == 0 {
            SecMiniCmd::A
        } else {
            SecMiniCmd::B
        };
        self.io
            .diseqc_burst(burst)
            .map_err(step("FE_DISEQC_SEND_BURST"))?;
        self.io.delay(DISEQC_STEP_DELAY);

        self.io.set_tone(tone).map_err(step("FE_SET_TONE"))?;
        Ok(())
    }

    fn tune_terr(&mut self, params: &TerrParams, t2: bool) -> Result<(), Fault> {
        if !t2 {
            let tune = OfdmTune {
                frequency_hz: params.frequency,
                bandwidth: params.bandwidth as u32,
                constellation: params.modulation as u32,
                transmission_mode: params.transmit_mode as u32,
                guard_interval: params.guard_interval as u32,
                hierarchy: params.hierarchy as u32,
            };
            self.io.tune_ofdm(&tune).map_err(step("FE_SET_FRONTEND"))?;
        } else {
            self.io
                .set_properties(&[DtvPair::new(DTV_CLEAR, 0)])
                .map_err(step("FE_SET_PROPERTY clear"))?;
            self.io.drain_events();
            let pairs = [
                DtvPair::new(DTV_FREQUENCY, params.frequency),
                DtvPair::new(DTV_MODULATION, params.modulation as u32),
                DtvPair::new(DTV_INVERSION, INVERSION_AUTO),
                DtvPair::new(DTV_BANDWIDTH_HZ, params.bandwidth.hz()),
                DtvPair::new(DTV_CODE_RATE_HP, FEC_AUTO),
                DtvPair::new(DTV_CODE_RATE_LP, FEC_AUTO),
                DtvPair::new(DTV_GUARD_INTERVAL, params.guard_interval as u32),
                DtvPair::new(DTV_TRANSMISSION_MODE, params.transmit_mode as u32),
                DtvPair::new(DTV_HIERARCHY, params.hierarchy as u32),
                DtvPair::new(DTV_DELIVERY_SYSTEM, SYS_DVBT),
                DtvPair::new(DTV_TUNE, 0),
            ];
            self.io
                .set_properties(&pairs)
                .map_err(step("FE_SET_PROPERTY tune"))?;
        }
        Ok(())
    }

    fn tune_cable(&mut self, params: &CableParams) -> Result<(), Fault> {
        self.io
            .tune_qam(
                params.frequency,
                params.symbol_rate,
                params.fec as u32,
                params.modulation as u32,
            )
            .map_err(step("FE_SET_FRONTEND"))?;
        Ok(())
    }
}

/// Reactor-side tuner state, driven by dequeued [`FeMessage`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TunerState {
    #[default]
    Tuning,
    Locked,
    RetunePending,
    Error,
}

/// Side effect requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerAction {
    None,
    /// Resynchronize the demux filters (stop+start every filter).
    Bounce,
}

impl TunerState {
    pub fn is_locked(&self) -> bool {
        matches!(self, TunerState::Locked)
    }

    /// Apply one worker message. The lock edge after a pending retune
    /// requests a demux bounce.
    pub fn on_message(&mut self, message: FeMessage) -> TunerAction {
        match message {
            FeMessage::Lock => {
                let action = if *self == TunerState::RetunePending {
                    TunerAction::Bounce
                } else {
                    TunerAction::None
                };
                if *self == TunerState::Locked {
                    return TunerAction::None;
                }
                *self = TunerState::Locked;
                action
            }
            FeMessage::Error => {
                *self = TunerState::Error;
                TunerAction::None
            }
            FeMessage::Retune => {
                if *self == TunerState::Locked {
                    *self = TunerState::RetunePending;
                }
                TunerAction::None
            }
        }
    }
}
