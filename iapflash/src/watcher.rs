//! Background serial port enumeration.
//!
//! [`PortWatcher`] polls the port list on a fixed interval and calls back
//! only when the set of ports differs from the last reported one. Polls are
//! skipped while a download holds the [`PortLock`].

use {
    crate::{error::Result, lock::PortLock},
    log::{debug, trace},
    std::{
        collections::BTreeSet,
        sync::mpsc::{self, RecvTimeoutError, Sender},
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Last reported port set.
#[derive(Debug, Default)]
pub struct PortSnapshot {
    last: Option<BTreeSet<String>>,
}

impl PortSnapshot {
    /// Record a fresh enumeration. Returns true if it should be reported,
    /// i.e. on the first call and whenever the set changed.
    pub fn update(&mut self, ports: &[String]) -> bool {
        let set: BTreeSet<String> = ports.iter().cloned().collect();
        if self.last.as_ref() == Some(&set) {
            return false;
        }
        self.last = Some(set);
        true
    }
}

/// Handle to a running watcher thread. Dropping it stops the thread.
pub struct PortWatcher {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl PortWatcher {
    /// Start polling `enumerate` every `interval`.
    ///
    /// `on_change` receives the full list, in enumeration order.
    pub fn spawn<E, F>(lock: PortLock, interval: Duration, mut enumerate: E, mut on_change: F) -> Result<Self>
    where
        E: FnMut() -> Result<Vec<String>> + Send + 'static,
        F: FnMut(&[String]) + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();

        let worker = thread::Builder::new()
            .name("port-watcher".into())
            .spawn(move || {
                let mut snapshot = PortSnapshot::default();
                loop {
                    if let Some(_guard) = lock.try_acquire() {
                        match enumerate() {
                            Ok(ports) => {
                                if snapshot.update(&ports) {
                                    debug!("Port list changed: {ports:?}");
                                    on_change(&ports);
                                }
                            },
                            Err(e) => debug!("Port enumeration failed: {e}"),
                        }
                    } else {
                        trace!("Port busy, skipping enumeration");
                    }

                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                trace!("Port watcher stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Watch the native serial ports, reporting display labels.
    #[cfg(feature = "native")]
    pub fn spawn_native<F>(lock: PortLock, interval: Duration, on_change: F) -> Result<Self>
    where
        F: FnMut(&[String]) + Send + 'static,
    {
        use crate::port::{NativePortEnumerator, PortEnumerator};

        Self::spawn(lock, interval, NativePortEnumerator::list_labels, on_change)
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                debug!("Port watcher thread panicked");
            }
        }
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
