//! Linux DVB tuner input.
//!
//! One instance owns a frontend worker thread, the reference-counted
//! PID demux, and the DVR reader, and pumps 188-byte TS packets into a
//! [`TsSink`] from a single-threaded event loop.

pub mod config;
pub mod demux;
pub mod dvr;
pub mod error;
pub mod frontend;
pub mod sys;
pub mod tune;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use input_common::{BitrateMeter, TsSink, WorkerHandle};
use mpegts::packet::PID_FULL_BAND;

pub use config::DvbConfig;
pub use error::DvbError;
use frontend::{
    FeMessage, FeSnapshot, FrontendWorker, SharedSnapshot, TunerAction, TunerState,
};
use sys::frontend::{FE_OFDM, FE_QAM, FE_QPSK, FeCaps, FrontendDevice};
use tune::{DeliverySystem, TuneCommand};

/// Bitrate statistics interval.
const STAT_INTERVAL: Duration = Duration::from_secs(2);

/// Snapshot returned by the status query.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: u32,
    pub lock: bool,
    pub signal: u8,
    pub snr: u8,
    pub ber: u32,
    pub unc: u32,
    pub bitrate: u32,
}

/// Hook fired on lock acquisition and loss.
pub type EventHandler = Box<dyn FnMut(&StatusReport) + Send>;

/// A DVB adapter input instance.
pub struct DvbInput {
    adapter: u32,
    device: u32,
    worker: Option<WorkerHandle>,
    messages: Option<mpsc::UnboundedReceiver<FeMessage>>,
    snapshot: SharedSnapshot,
    state: TunerState,
    demux: demux::DemuxManager,
    dvr: Option<dvr::DvrReader>,
    buffer_size: u32,
    meter: BitrateMeter,
    on_event: Option<EventHandler>,
}

impl DvbInput {
    /// Open the input: validate the tune configuration, open and
    /// verify the frontend, spawn the worker, open the DVR device and
    /// arm the demux. Must run inside the reactor (the DVR fd
    /// registers with it).
    pub fn open(config: &DvbConfig) -> Result<Self, DvbError> {
        let tune = config.tune()?;

        let frontend = FrontendDevice::open(config.adapter, config.device)?;
        Self::validate_frontend(&frontend, &tune, config)?;

        let snapshot: SharedSnapshot = SharedSnapshot::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let fe_worker = FrontendWorker::new(frontend, tune, snapshot.clone(), tx);
        let worker = WorkerHandle::spawn("dvb-frontend", move |flag| fe_worker.run(flag))?;

        let dvr = dvr::DvrReader::open(config.adapter, config.device, config.buffer_size)?;

        let mut demux = demux::DemuxManager::new(config.budget);
        demux.backend_mut().set_device(PathBuf::from(format!(
            "/dev/dvb/adapter{}/demux{}",
            config.adapter, config.device
        )));
        if config.budget {
            demux.join(PID_FULL_BAND);
        }
        // open filters for any PIDs subscribed before the device path
        // was known
        demux.replay_pending_joins();

        info!(
            adapter = config.adapter,
            device = config.device,
            delivery = ?tune.delivery(),
            budget = config.budget,
            "dvb input open"
        );

        Ok(DvbInput {
            adapter: config.adapter,
            device: config.device,
            worker: Some(worker),
            messages: Some(rx),
            snapshot,
            state: TunerState::Tuning,
            demux,
            dvr: Some(dvr),
            buffer_size: config.buffer_size,
            meter: BitrateMeter::new("dvb"),
            on_event: None,
        })
    }

    /// A frontend that cannot serve the requested tune is as unusable
    /// as one that failed to open, so every rejection here is a
    /// [`DvbError::DeviceOpen`] for the frontend node.
    fn validate_frontend(
        frontend: &FrontendDevice,
        tune: &TuneCommand,
        config: &DvbConfig,
    ) -> Result<(), DvbError> {
        let device = format!(
            "/dev/dvb/adapter{}/frontend{}",
            config.adapter, config.device
        );
        let reject = |reason: String| DvbError::DeviceOpen {
            device: device.clone(),
            source: std::io::Error::other(reason),
        };

        let info = frontend.info().map_err(|errno| DvbError::Ioctl {
            step: "FE_GET_INFO",
            errno,
        })?;

        match info.fe_type {
            FE_QPSK => {
                if tune.delivery() == DeliverySystem::S2
                    && !info.caps().contains(FeCaps::CAN_2G_MODULATION)
                {
                    return Err(reject(format!(
                        "adapter {} does not support DVB-S2",
                        config.adapter
                    )));
                }
            }
            FE_OFDM | FE_QAM => {}
            other => {
                return Err(reject(format!("unknown frontend type {other}")));
            }
        }

        let (major, minor) = frontend.api_version().map_err(|errno| DvbError::Ioctl {
            step: "FE_GET_PROPERTY",
            errno,
        })?;
        if major < 5 {
            return Err(reject(format!(
                "DVB API {major}.{minor} is too old, version 5 required"
            )));
        }

        Ok(())
    }

    /// Forwarded PID subscription from the downstream pipeline.
    pub fn join_pid(&mut self, pid: u16) {
        self.demux.join(pid);
    }

    /// Forwarded PID unsubscription from the downstream pipeline.
    pub fn leave_pid(&mut self, pid: u16) {
        self.demux.leave(pid);
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.on_event = Some(handler);
    }

    pub fn status(&self) -> StatusReport {
        let snapshot = self.snapshot.lock().clone();
        StatusReport {
            status: snapshot.bits,
            lock: self.state.is_locked(),
            signal: snapshot.signal_pct,
            snr: snapshot.snr_pct,
            ber: snapshot.ber,
            unc: snapshot.unc,
            bitrate: self.meter.kbps(),
        }
    }

    /// Drive the input: DVR reads, frontend messages, statistics and
    /// the DVR reopen cycle. Runs until the frontend worker goes away
    /// or the future is dropped.
    pub async fn run(&mut self, sink: &mut dyn TsSink) -> Result<(), DvbError> {
        let mut stat = tokio::time::interval(STAT_INTERVAL);
        stat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        stat.tick().await;

        let mut reopen_deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                message = Self::recv(&mut self.messages) => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            warn!("frontend worker channel closed");
                            self.messages = None;
                        }
                    }
                }

                _ = stat.tick() => {
                    self.meter.tick(STAT_INTERVAL);
                }

                _ = Self::sleep_until(reopen_deadline), if reopen_deadline.is_some() => {
                    reopen_deadline = None;
                    self.reopen_dvr(&mut reopen_deadline);
                }

                result = Self::pump(self.dvr.as_mut(), sink, &mut self.meter),
                    if self.dvr.is_some() =>
                {
                    match result {
                        Ok(read) if read > 0 => {}
                        Ok(_) | Err(_) => {
                            if let Err(err) = &result {
                                warn!(%err, "dvr read error, trying to reopen");
                            } else {
                                warn!("dvr end of stream, trying to reopen");
                            }
                            self.close_dvr();
                            self.reopen_dvr(&mut reopen_deadline);
                        }
                    }
                }
            }
        }
    }

    async fn recv(
        messages: &mut Option<mpsc::UnboundedReceiver<FeMessage>>,
    ) -> Option<FeMessage> {
        match messages {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn sleep_until(deadline: Option<tokio::time::Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    async fn pump(
        dvr: Option<&mut dvr::DvrReader>,
        sink: &mut dyn TsSink,
        meter: &mut BitrateMeter,
    ) -> std::io::Result<usize> {
        match dvr {
            Some(dvr) => dvr.pump(sink, meter).await,
            None => std::future::pending().await,
        }
    }

    fn close_dvr(&mut self) {
        self.dvr = None;
        self.meter.reset();
    }

    fn reopen_dvr(&mut self, reopen_deadline: &mut Option<tokio::time::Instant>) {
        match dvr::DvrReader::open(self.adapter, self.device, self.buffer_size) {
            Ok(reader) => {
                self.dvr = Some(reader);
            }
            Err(err) => {
                error!(%err, "dvr reopen failed, retrying in {:?}", dvr::REOPEN_RETRY);
                *reopen_deadline = Some(tokio::time::Instant::now() + dvr::REOPEN_RETRY);
            }
        }
    }

    /// Apply one worker message to the reactor-side tuner state.
    fn handle_message(&mut self, message: FeMessage) {
        let snapshot: FeSnapshot = self.snapshot.lock().clone();
        match message {
            FeMessage::Lock => {
                info!(
                    signal = snapshot.signal_pct,
                    snr = snapshot.snr_pct,
                    "frontend lock"
                );
            }
            FeMessage::Error => {
                if let Some(fault) = snapshot.last_fault {
                    error!(step = fault.step, errno = fault.errno, "frontend error");
                }
            }
            FeMessage::Retune => {
                info!(
                    flags = %snapshot.flags(),
                    signal = snapshot.signal_pct,
                    snr = snapshot.snr_pct,
                    "frontend retune"
                );
            }
        }

        let was_locked = self.state.is_locked();
        let action = self.state.on_message(message);
        if action == TunerAction::Bounce {
            self.demux.bounce();
        }

        // the user event fires on the lock and loss edges only; the
        // error path just marks the tuner down
        let edge = match message {
            FeMessage::Lock => !was_locked && self.state.is_locked(),
            FeMessage::Retune => was_locked && !self.state.is_locked(),
            FeMessage::Error => false,
        };
        if edge && self.on_event.is_some() {
            let report = self.status();
            if let Some(handler) = self.on_event.as_mut() {
                handler(&report);
            }
        }
    }
}

impl Drop for DvbInput {
    fn drop(&mut self) {
        // stop the worker, drain the channel, then close the fds
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        if let Some(mut rx) = self.messages.take() {
            while rx.try_recv().is_ok() {}
        }
        self.demux.force_close();
        self.dvr = None;
    }
}
