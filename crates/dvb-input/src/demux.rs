//! Reference-counted PID filter management over the kernel demux.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use tracing::{debug, error};

use mpegts::packet::PID_FULL_BAND;

use crate::sys::demux as dmx;

const MAX_PID: usize = 8192;

/// One active PID filter.
pub trait PidFilter {
    fn start(&mut self);
    fn stop(&mut self);
}

/// Opens PID filters. The kernel backend opens the demux device and
/// applies a PES filter; tests substitute a recording backend.
pub trait FilterBackend {
    type Filter: PidFilter;

    /// Open a filter for `pid`, or `None` when the backend is not yet
    /// initialized or the open fails.
    fn open(&mut self, pid: u16) -> Option<Self::Filter>;

    fn is_initialized(&self) -> bool;
}

/// Kernel demux filter: one fd per filtered PID, closed on drop.
pub struct KernelFilter {
    file: File,
}

impl PidFilter for KernelFilter {
    fn start(&mut self) {
        let _ = dmx::start(self.file.as_raw_fd());
    }

    fn stop(&mut self) {
        let _ = dmx::stop(self.file.as_raw_fd());
    }
}

/// Kernel backend bound to `/dev/dvb/adapterA/demuxD` once known.
#[derive(Default)]
pub struct KernelBackend {
    dev_path: Option<PathBuf>,
}

impl KernelBackend {
    pub fn new() -> Self {
        KernelBackend { dev_path: None }
    }

    pub fn set_device(&mut self, dev_path: PathBuf) {
        self.dev_path = Some(dev_path);
    }
}

impl FilterBackend for KernelBackend {
    type Filter = KernelFilter;

    fn open(&mut self, pid: u16) -> Option<KernelFilter> {
        let dev_path = self.dev_path.as_ref()?;
        let file = match OpenOptions::new().write(true).open(dev_path) {
            Ok(file) => file,
            Err(err) => {
                error!(device = %dev_path.display(), %err, "failed to open demux");
                return None;
            }
        };
        if let Err(errno) = dmx::set_pes_filter(file.as_raw_fd(), pid) {
            error!(pid, %errno, "failed to set PES filter");
            return None;
        }
        Some(KernelFilter { file })
    }

    fn is_initialized(&self) -> bool {
        self.dev_path.is_some()
    }
}

/// Reference-counted PID filter table.
///
/// Budget mode and selective mode are mutually exclusive per instance:
/// in budget mode only the full-band pseudo-PID 8192 opens (one) fd and
/// every other join is a no-op; in selective mode each PID carries a
/// reference count and one fd while the count is nonzero.
pub struct DemuxManager<B: FilterBackend = KernelBackend> {
    backend: B,
    budget: bool,
    budget_filter: Option<B::Filter>,
    refs: Vec<u32>,
    filters: Vec<Option<B::Filter>>,
}

impl DemuxManager<KernelBackend> {
    pub fn new(budget: bool) -> Self {
        Self::with_backend(KernelBackend::new(), budget)
    }
}

impl<B: FilterBackend> DemuxManager<B> {
    pub fn with_backend(backend: B, budget: bool) -> Self {
        let mut filters = Vec::with_capacity(MAX_PID);
        filters.resize_with(MAX_PID, || None);
        DemuxManager {
            backend,
            budget,
            budget_filter: None,
            refs: vec![0; MAX_PID],
            filters,
        }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_budget(&self) -> bool {
        self.budget
    }

    /// Subscribe a PID.
    ///
    /// In selective mode the reference count is incremented before the
    /// device open is attempted and is intentionally left incremented
    /// when the open fails: the PID stays unfiltered, but a later
    /// `leave` still balances deterministically.
    pub fn join(&mut self, pid: u16) {
        if self.budget {
            if pid != PID_FULL_BAND || self.budget_filter.is_some() {
                return;
            }
            if !self.backend.is_initialized() {
                return;
            }
            self.budget_filter = self.backend.open(pid);
            return;
        }

        if pid >= PID_FULL_BAND {
            return;
        }
        let index = pid as usize;
        self.refs[index] += 1;
        if self.filters[index].is_some() || !self.backend.is_initialized() {
            return;
        }
        self.filters[index] = self.backend.open(pid);
    }

    /// Unsubscribe a PID; the filter closes on the last leave.
    pub fn leave(&mut self, pid: u16) {
        if self.budget {
            if pid == PID_FULL_BAND {
                self.budget_filter = None;
            }
            return;
        }

        if pid >= PID_FULL_BAND {
            return;
        }
        let index = pid as usize;
        self.refs[index] = self.refs[index].saturating_sub(1);
        if self.refs[index] == 0 && self.filters[index].is_some() {
            debug!(pid, "closing PID filter");
            self.filters[index] = None;
        }
    }

    /// Stop and restart every open filter. Used after a retune to
    /// resynchronize kernel filter state.
    pub fn bounce(&mut self) {
        if let Some(filter) = self.budget_filter.as_mut() {
            filter.stop();
            filter.start();
        }
        for filter in self.filters.iter_mut().flatten() {
            filter.stop();
            filter.start();
        }
    }

    /// Open filters for every PID joined before the backend was
    /// initialized, without touching the reference counts.
    pub fn replay_pending_joins(&mut self) {
        if self.budget || !self.backend.is_initialized() {
            return;
        }
        for index in 0..MAX_PID {
            if self.refs[index] > 0 && self.filters[index].is_none() {
                self.filters[index] = self.backend.open(index as u16);
            }
        }
    }

    /// Teardown: close every filter regardless of reference counts.
    pub fn force_close(&mut self) {
        self.budget_filter = None;
        for index in 0..MAX_PID {
            self.refs[index] = 0;
            self.filters[index] = None;
        }
    }

    pub fn refcount(&self, pid: u16) -> u32 {
        self.refs[pid as usize]
    }

    pub fn has_filter(&self, pid: u16) -> bool {
        if pid == PID_FULL_BAND {
            self.budget_filter.is_some()
        } else {
            self.filters[pid as usize].is_some()
        }
    }

    pub fn active_filters(&self) -> usize {
        self.filters.iter().filter(|filter| filter.is_some()).count()
            + usize::from(self.budget_filter.is_some())
    }
}
