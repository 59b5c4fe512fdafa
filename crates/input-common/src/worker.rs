use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::warn;

/// Cooperative run flag shared between an input and its worker thread.
///
/// Workers poll the flag at each loop turn, after returning from the
/// current ioctl, read or sleep; there is no forced cancellation.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        RunFlag(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns a worker thread and its run flag; stops and joins on drop.
pub struct WorkerHandle {
    name: &'static str,
    flag: RunFlag,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a named worker. The closure receives the run flag and is
    /// expected to return once the flag clears.
    pub fn spawn<F>(name: &'static str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(RunFlag) + Send + 'static,
    {
        let flag = RunFlag::new();
        let thread_flag = flag.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_flag))?;
        Ok(WorkerHandle {
            name,
            flag,
            handle: Some(handle),
        })
    }

    /// Clear the run flag and join the worker. The join blocks until
    /// the worker finishes its current ioctl or sleep.
    pub fn stop(&mut self) {
        self.flag.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(worker = self.name, "worker thread panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
