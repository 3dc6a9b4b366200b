//! Headless programmer: the entry point front ends drive.
//!
//! A [`Programmer`] holds the most recently loaded image and runs at most one
//! download at a time on a dedicated worker thread. Starting a second
//! download while one is active fails with [`Error::Busy`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use iapflash::{DownloadRequest, NoProgress, Programmer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut programmer = Programmer::new();
//!     let image = programmer.load_file("app.hex")?;
//!     println!("{} Bytes, CRC {}", image.total_bytes, image.checksum_hex());
//!
//!     let request = DownloadRequest::from_user_input(Some("/dev/ttyUSB0"), 115200, "08010000")?;
//!     let handle = programmer.start_download(request, Box::new(NoProgress))?;
//!     handle.join()?;
//!     Ok(())
//! }
//! ```

use {
    crate::{
        error::{Error, Result, UserInputError},
        image::FirmwareImage,
        lock::PortLock,
        port::{Port, port_name_from_label, validate_baud_rate},
        progress::ProgressSink,
        session::{CancelToken, DownloadSession, SETTLE_DELAY},
    },
    log::{debug, info},
    std::{
        path::Path,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Default base address for BIN images.
pub const DEFAULT_BASE_ADDRESS: u32 = 0x0801_0000;

/// Parse a hexadecimal start address.
///
/// Accepts an optional `0x`/`0X` prefix and `_` separators.
pub fn parse_base_address(text: &str) -> Result<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");

    if digits.is_empty() {
        return Err(UserInputError::InvalidBaseAddress(text.to_string()).into());
    }
    u32::from_str_radix(&digits, 16)
        .map_err(|_| UserInputError::InvalidBaseAddress(text.to_string()).into())
}

/// Format an address the way it is entered: eight upper-case hex digits.
pub fn format_base_address(address: u32) -> String {
    format!("{address:08X}")
}

/// Validated parameters for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Port name/path.
    pub port: String,
    /// Baud rate, one of [`crate::port::SUPPORTED_BAUD_RATES`].
    pub baud_rate: u32,
    /// Added to BIN block offsets.
    pub base_address: u32,
}

impl DownloadRequest {
    /// Validate raw user input.
    ///
    /// `port` may be a bare name or a display label such as
    /// `"USB-SERIAL CH340 (COM7)"`.
    pub fn from_user_input(port: Option<&str>, baud_rate: u32, base_address: &str) -> Result<Self> {
        let port = port
            .map(port_name_from_label)
            .filter(|p| !p.is_empty())
            .ok_or(UserInputError::NoPortSelected)?;

        Ok(Self {
            port: port.to_string(),
            baud_rate: validate_baud_rate(baud_rate)?,
            base_address: parse_base_address(base_address)?,
        })
    }
}

/// Resets the busy flag when the worker ends, however it ends.
struct BusyReset(Arc<AtomicBool>);

impl Drop for BusyReset {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A running download.
pub struct DownloadHandle {
    cancel: CancelToken,
    worker: JoinHandle<Result<()>>,
}

impl DownloadHandle {
    /// Ask the worker to stop before the next block.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this download, for use from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the download and return its outcome.
    pub fn join(self) -> Result<()> {
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerPanicked),
        }
    }
}

/// Loaded image plus the single-download guard.
pub struct Programmer {
    image: Option<Arc<FirmwareImage>>,
    lock: PortLock,
    busy: Arc<AtomicBool>,
    settle_delay: Duration,
}

impl Default for Programmer {
    fn default() -> Self {
        Self::new()
    }
}

impl Programmer {
    /// Create a programmer with no image loaded.
    pub fn new() -> Self {
        Self {
            image: None,
            lock: PortLock::new(),
            busy: Arc::new(AtomicBool::new(false)),
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Override the post-handshake settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Load a firmware file, replacing any previously loaded image.
    ///
    /// On failure the previous image is kept.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&FirmwareImage> {
        let image = FirmwareImage::from_file(path)?;
        Ok(&**self.image.insert(Arc::new(image)))
    }

    /// Use an already parsed image.
    pub fn set_image(&mut self, image: FirmwareImage) {
        self.image = Some(Arc::new(image));
    }

    /// Currently loaded image.
    pub fn image(&self) -> Option<&FirmwareImage> {
        self.image.as_deref()
    }

    /// The guard shared with a [`crate::watcher::PortWatcher`].
    pub fn port_lock(&self) -> PortLock {
        self.lock.clone()
    }

    /// Whether a download worker is running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a download on a native serial port.
    #[cfg(feature = "native")]
    pub fn start_download(
        &self,
        request: DownloadRequest,
        sink: Box<dyn ProgressSink + Send>,
    ) -> Result<DownloadHandle> {
        self.start_download_with(request, sink, |request| {
            NativePort::open(&SerialConfig::new(&request.port, request.baud_rate))
        })
    }

    /// Start a download on a port produced by `open`.
    ///
    /// `open` runs on the worker thread while the port lock is held.
    pub fn start_download_with<P, O>(
        &self,
        request: DownloadRequest,
        mut sink: Box<dyn ProgressSink + Send>,
        open: O,
    ) -> Result<DownloadHandle>
    where
        P: Port + 'static,
        O: FnOnce(&DownloadRequest) -> Result<P> + Send + 'static,
    {
        let image = self.image.clone().ok_or(UserInputError::NoImageLoaded)?;
        if image.is_empty() {
            return Err(UserInputError::EmptyImage.into());
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let busy = BusyReset(Arc::clone(&self.busy));

        let cancel = CancelToken::new();
        let lock = self.lock.clone();
        let settle_delay = self.settle_delay;
        let token = cancel.clone();

        info!(
            "Starting download: {} blocks to {} at {} baud",
            image.block_count(),
            request.port,
            request.baud_rate
        );

        let worker = thread::Builder::new()
            .name("iap-download".into())
            .spawn(move || {
                let _busy = busy;
                let _guard = lock.acquire();
                debug!("Port lock acquired for {}", request.port);

                let port = open(&request)?;
                DownloadSession::new(port, &image, request.base_address)
                    .with_settle_delay(settle_delay)
                    .with_cancel_token(token)
                    .run(sink.as_mut())
            })?;

        Ok(DownloadHandle { cancel, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageOrigin;
    use crate::port::mock::MockPort;
    use crate::progress::NoProgress;
    use crate::protocol::iap::ACK;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn request() -> DownloadRequest {
        DownloadRequest::from_user_input(Some("mock"), 115200, "08010000").unwrap()
    }

    fn programmer_with_bin(len: usize) -> Programmer {
        let mut programmer = Programmer::new().with_settle_delay(Duration::ZERO);
        programmer.set_image(crate::image::bin::parse(&vec![0xA5; len]).unwrap());
        programmer
    }

    #[test]
    fn test_parse_base_address() {
        assert_eq!(parse_base_address("08010000").unwrap(), 0x0801_0000);
        assert_eq!(parse_base_address("0x0800_4000").unwrap(), 0x0800_4000);
        assert_eq!(parse_base_address(" 0Xff ").unwrap(), 0xFF);
        assert_eq!(parse_base_address("ffffffff").unwrap(), u32::MAX);
        for bad in ["", "0x", "xyz", "100000000", "-1"] {
            assert!(
                matches!(
                    parse_base_address(bad),
                    Err(Error::UserInput(UserInputError::InvalidBaseAddress(_)))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(format_base_address(0x0801_0000), "08010000");
    }

    #[test]
    fn test_request_from_user_input() {
        let req = DownloadRequest::from_user_input(Some("USB-SERIAL CH340 (COM7)"), 921600, "0x08000000")
            .unwrap();
        assert_eq!(req.port, "COM7");
        assert_eq!(req.baud_rate, 921600);
        assert_eq!(req.base_address, 0x0800_0000);

        assert!(matches!(
            DownloadRequest::from_user_input(None, 115200, "0"),
            Err(Error::UserInput(UserInputError::NoPortSelected))
        ));
        assert!(matches!(
            DownloadRequest::from_user_input(Some("  "), 115200, "0"),
            Err(Error::UserInput(UserInputError::NoPortSelected))
        ));
        assert!(matches!(
            DownloadRequest::from_user_input(Some("COM1"), 12345, "0"),
            Err(Error::UserInput(UserInputError::UnsupportedBaudRate(12345)))
        ));
    }

    #[test]
    fn test_start_without_image() {
        let programmer = Programmer::new();
        let result = programmer.start_download_with(request(), Box::new(NoProgress), |_| {
            Ok(MockPort::acking(4))
        });
        assert!(matches!(
            result,
            Err(Error::UserInput(UserInputError::NoImageLoaded))
        ));
        assert!(!programmer.is_busy());
    }

    #[test]
    fn test_start_with_empty_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        let mut programmer = Programmer::new();
        assert!(programmer.load_file(&path).unwrap().is_empty());
        let result = programmer.start_download_with(request(), Box::new(NoProgress), |_| {
            Ok(MockPort::acking(4))
        });
        assert!(matches!(
            result,
            Err(Error::UserInput(UserInputError::EmptyImage))
        ));
    }

    #[test]
    fn test_load_file_replaces_image() {
        let dir = tempdir().unwrap();
        let bin = dir.path().join("app.bin");
        let hex = dir.path().join("app.hex");
        fs::write(&bin, [0u8; 10]).unwrap();
        fs::write(&hex, ":020000040800F2\n:0400100001020304E2\n:00000001FF\n").unwrap();

        let mut programmer = Programmer::new();
        assert!(programmer.image().is_none());
        programmer.load_file(&bin).unwrap();
        assert_eq!(programmer.image().unwrap().origin, ImageOrigin::Bin);

        let image = programmer.load_file(&hex).unwrap();
        assert_eq!(image.suggested_base_address(), Some(0x0800_0010));
        assert_eq!(programmer.image().unwrap().origin, ImageOrigin::Hex);

        // A failed load keeps the previous image.
        assert!(programmer.load_file(dir.path().join("app.elf")).is_err());
        assert_eq!(programmer.image().unwrap().origin, ImageOrigin::Hex);
    }

    #[test]
    fn test_download_runs_on_worker() {
        let programmer = programmer_with_bin(3000);
        let port = MockPort::acking(5);
        let worker_port = port.clone();

        let handle = programmer
            .start_download_with(request(), Box::new(NoProgress), move |_| Ok(worker_port))
            .unwrap();
        handle.join().unwrap();

        assert!(!programmer.is_busy());
        let writes = port.writes();
        assert_eq!(writes.len(), 5);
        assert_eq!(&writes[3][1..5], &[0x08, 0x01, 0x08, 0x00]);
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_second_download_is_rejected_while_busy() {
        let programmer = programmer_with_bin(100);
        let (release, gate) = mpsc::channel::<()>();
        let (started_tx, started) = mpsc::channel::<()>();

        let first = programmer
            .start_download_with(request(), Box::new(NoProgress), move |_| {
                started_tx.send(()).ok();
                gate.recv().ok();
                Ok(MockPort::acking(4))
            })
            .unwrap();

        started.recv().unwrap();
        assert!(programmer.is_busy());
        assert!(!first.is_finished());
        let second = programmer.start_download_with(request(), Box::new(NoProgress), |_| {
            Ok(MockPort::acking(4))
        });
        assert!(matches!(second, Err(Error::Busy)));
        assert!(programmer.port_lock().try_acquire().is_none());

        release.send(()).unwrap();
        first.join().unwrap();
        assert!(!programmer.is_busy());

        let third = programmer
            .start_download_with(request(), Box::new(NoProgress), |_| Ok(MockPort::acking(4)))
            .unwrap();
        third.join().unwrap();
    }

    #[test]
    fn test_cancel_before_first_block() {
        let programmer = programmer_with_bin(5000);
        let port = MockPort::acking(6);
        let worker_port = port.clone();
        let (release, gate) = mpsc::channel::<()>();

        let handle = programmer
            .start_download_with(request(), Box::new(NoProgress), move |_| {
                gate.recv().ok();
                Ok(worker_port)
            })
            .unwrap();
        handle.cancel();
        release.send(()).unwrap();

        assert!(matches!(handle.join(), Err(Error::Cancelled)));
        assert_eq!(port.writes().len(), 2);
        assert_eq!(port.close_count(), 1);
        assert!(!programmer.is_busy());
    }

    #[test]
    fn test_open_failure_releases_busy_flag() {
        let programmer = programmer_with_bin(10);
        let handle = programmer
            .start_download_with::<MockPort, _>(request(), Box::new(NoProgress), |_| {
                Err(UserInputError::NoPortSelected.into())
            })
            .unwrap();
        assert!(matches!(
            handle.join(),
            Err(Error::UserInput(UserInputError::NoPortSelected))
        ));
        assert!(!programmer.is_busy());
    }

    #[test]
    fn test_device_failure_surfaces_from_join() {
        let programmer = programmer_with_bin(10);
        let handle = programmer
            .start_download_with(request(), Box::new(NoProgress), |_| {
                Ok(MockPort::new(&[ACK[0], ACK[1], 0x00, 0x00]))
            })
            .unwrap();
        let err = handle.join().unwrap_err();
        assert!(err.is_device_error());
        assert_eq!(err.to_string(), "Protocol error: Mode entry failed");
    }
}
