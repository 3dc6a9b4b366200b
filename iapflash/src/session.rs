//! Download session: the bootloader state machine.
//!
//! ```text
//! Idle -> Handshaking -> ModeEntry -> Transferring(0..n) -> Finalizing -> Completed
//!              \              \                \                  \
//!               +--------------+----------------+------------------+--> Failed / Cancelled
//! ```
//!
//! Every acknowledgement is a single `CC DD` read under the port's fixed
//! read timeout. There are no retries: the first missing or wrong reply ends
//! the session. The port is closed on every exit path.

use {
    crate::{
        error::{Error, ProtocolError, Result},
        image::FirmwareImage,
        port::Port,
        progress::{ProgressSink, ProgressTracker},
        protocol::iap::{Command, build_block_packet, is_ack},
    },
    log::{debug, info, trace, warn},
    std::{
        io::{ErrorKind, Read},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    },
};

/// Pause after a successful handshake while the target finishes booting.
pub const SETTLE_DELAY: Duration = Duration::from_millis(800);

/// Progress checkpoints, in percent.
const PROGRESS_HANDSHAKE: u64 = 5;
const PROGRESS_MODE_ENTRY: u64 = 10;
const PROGRESS_TRANSFER_SPAN: u64 = 80;
const PROGRESS_FINALIZE: u64 = 95;
const PROGRESS_DONE: u64 = 100;

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not started.
    Idle,
    /// Waiting for the reply to `5A A5`.
    Handshaking,
    /// Waiting for the reply to `5A 01`.
    ModeEntry,
    /// Sending the block with this zero-based index.
    Transferring(usize),
    /// `5A 02` sent.
    Finalizing,
    /// All blocks acknowledged.
    Completed,
    /// Ended with an error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl SessionPhase {
    /// True once the session can make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Shared flag a caller sets to stop a running session between blocks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Percentage reached after block `index` of `count` has been acknowledged.
fn block_progress(index: usize, count: usize) -> u64 {
    let span = (index as u64 + 1) * PROGRESS_TRANSFER_SPAN / count.max(1) as u64;
    PROGRESS_MODE_ENTRY + span
}

/// One download of one image over one port.
pub struct DownloadSession<'a, P: Port> {
    port: P,
    image: &'a FirmwareImage,
    base_address: u32,
    settle_delay: Duration,
    cancel: CancelToken,
    phase: SessionPhase,
    closed: bool,
}

impl<'a, P: Port> DownloadSession<'a, P> {
    /// Create a session on an already opened port.
    ///
    /// `base_address` is only added to BIN block offsets; HEX blocks carry
    /// absolute addresses.
    pub fn new(port: P, image: &'a FirmwareImage, base_address: u32) -> Self {
        Self {
            port,
            image,
            base_address,
            settle_delay: SETTLE_DELAY,
            cancel: CancelToken::new(),
            phase: SessionPhase::Idle,
            closed: false,
        }
    }

    /// Override the post-handshake settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Use a caller-owned cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the whole protocol, then close the port.
    pub fn run(mut self, sink: &mut dyn ProgressSink) -> Result<()> {
        let mut progress = ProgressTracker::new(sink);
        progress.label("Downloading...");

        let result = self.transfer(&mut progress).and_then(|()| self.close());

        match result {
            Ok(()) => {
                self.enter(SessionPhase::Completed, &mut progress);
                progress.label("Download complete");
                info!("Download complete");
                Ok(())
            },
            Err(e) => {
                if let Err(close_err) = self.close() {
                    debug!("Close after failure: {close_err}");
                }
                let phase = if matches!(e, Error::Cancelled) {
                    SessionPhase::Cancelled
                } else {
                    SessionPhase::Failed
                };
                self.enter(phase, &mut progress);
                progress.label(&e.to_string());
                warn!("Download stopped: {e}");
                Err(e)
            },
        }
    }

    fn transfer(&mut self, progress: &mut ProgressTracker<'_>) -> Result<()> {
        self.port.clear_buffers()?;

        self.enter(SessionPhase::Handshaking, progress);
        progress.label("Handshaking...");
        self.send(Command::Handshake)?;
        self.expect_ack(ProtocolError::HandshakeTimeout)?;
        info!("Handshake OK on {}", self.port.name());
        progress.percent(PROGRESS_HANDSHAKE);

        trace!("Settling for {:?}", self.settle_delay);
        thread::sleep(self.settle_delay);

        self.enter(SessionPhase::ModeEntry, progress);
        progress.label("Entering download mode...");
        self.send(Command::ModeEntry)?;
        self.expect_ack(ProtocolError::ModeEntryFailed)?;
        info!("Download mode entered");
        progress.percent(PROGRESS_MODE_ENTRY);

        let count = self.image.block_count();
        for (index, block) in self.image.blocks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Cancelled before block {index}");
                return Err(Error::Cancelled);
            }

            self.enter(SessionPhase::Transferring(index), progress);
            let address = self.image.target_address(index, self.base_address)?;
            progress.label(&format!("Block {}/{count} @ 0x{address:08X}", index + 1));

            let packet = build_block_packet(address, block.data());
            debug!(
                "Block {}/{count}: {} bytes to {address:#010x}",
                index + 1,
                packet.len()
            );
            self.port.write_all_bytes(&packet)?;
            self.expect_ack(ProtocolError::BlockAckFailed { index, address })?;

            progress.percent(block_progress(index, count));
        }

        progress.percent(PROGRESS_FINALIZE);
        self.enter(SessionPhase::Finalizing, progress);
        progress.label("Finalizing...");
        self.send(Command::Finalize)?;
        self.drain_final_response();
        progress.percent(PROGRESS_DONE);

        Ok(())
    }

    fn enter(&mut self, phase: SessionPhase, progress: &mut ProgressTracker<'_>) {
        trace!("{:?} -> {phase:?}", self.phase);
        self.phase = phase;
        progress.phase(phase);
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let bytes = command.bytes();
        trace!("TX {command:?}: {:02X} {:02X}", bytes[0], bytes[1]);
        self.port.write_all_bytes(&bytes)
    }

    /// Read one two-byte reply and require `CC DD`.
    fn expect_ack(&mut self, failure: ProtocolError) -> Result<()> {
        let mut reply = [0u8; 2];
        match self.port.read_exact(&mut reply) {
            Ok(()) if is_ack(&reply) => {
                trace!("RX ack");
                Ok(())
            },
            Ok(()) => {
                debug!("RX {:02X} {:02X}, expected ack", reply[0], reply[1]);
                Err(failure.into())
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::UnexpectedEof) => {
                debug!("No ack: {e}");
                Err(failure.into())
            },
            Err(e) => Err(Error::PortIo(e)),
        }
    }

    /// The reply to `5A 02` carries no meaning; read it and move on.
    fn drain_final_response(&mut self) {
        let mut reply = [0u8; 2];
        match self.port.read(&mut reply) {
            Ok(n) => trace!("Finalize reply ({n} bytes) ignored"),
            Err(e) => debug!("Finalize reply not received ({e}), ignoring"),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.port.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Block, ImageOrigin};
    use crate::port::mock::MockPort;
    use crate::protocol::iap::{ACK, BLOCK_PACKET_LEN, FINALIZE, HANDSHAKE, MODE_ENTRY};

    #[derive(Default)]
    struct Recorder {
        phases: Vec<SessionPhase>,
        values: Vec<u64>,
        labels: Vec<String>,
    }

    impl ProgressSink for Recorder {
        fn set_label(&mut self, text: &str) {
            self.labels.push(text.to_string());
        }

        fn set_progress(&mut self, current: u64, total: u64) {
            assert_eq!(total, 100);
            self.values.push(current);
        }

        fn phase_changed(&mut self, phase: SessionPhase) {
            self.phases.push(phase);
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn image(origin: ImageOrigin, addresses: &[u32]) -> FirmwareImage {
        FirmwareImage {
            blocks: addresses
                .iter()
                .enumerate()
                .map(|(i, &a)| Block::from_slice(a, &[i as u8; 16]))
                .collect(),
            total_bytes: 16 * addresses.len() as u64,
            checksum: 0,
            min_address: addresses.iter().copied().min(),
            origin,
        }
    }

    fn session<'a>(port: MockPort, image: &'a FirmwareImage, base: u32) -> DownloadSession<'a, MockPort> {
        DownloadSession::new(port, image, base).with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn test_block_progress_checkpoints() {
        assert_eq!(block_progress(0, 1), 90);
        assert_eq!(block_progress(0, 3), 36);
        assert_eq!(block_progress(1, 3), 63);
        assert_eq!(block_progress(2, 3), 90);
    }

    #[test]
    fn test_happy_path() {
        init_logger();
        let image = image(ImageOrigin::Bin, &[0, 2048, 4096]);
        // handshake + mode entry + 3 blocks + finalize reply
        let port = MockPort::acking(6);
        let mut recorder = Recorder::default();

        session(port.clone(), &image, 0x0801_0000)
            .run(&mut recorder)
            .unwrap();

        assert_eq!(
            recorder.phases,
            vec![
                SessionPhase::Handshaking,
                SessionPhase::ModeEntry,
                SessionPhase::Transferring(0),
                SessionPhase::Transferring(1),
                SessionPhase::Transferring(2),
                SessionPhase::Finalizing,
                SessionPhase::Completed,
            ]
        );
        assert_eq!(recorder.values, vec![5, 10, 36, 63, 90, 95, 100]);
        assert!(recorder.values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(recorder.labels.first().unwrap(), "Downloading...");
        assert_eq!(recorder.labels.last().unwrap(), "Download complete");

        let writes = port.writes();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[0], HANDSHAKE);
        assert_eq!(writes[1], MODE_ENTRY);
        for (i, packet) in writes[2..5].iter().enumerate() {
            assert_eq!(packet.len(), BLOCK_PACKET_LEN);
            assert_eq!(packet[0], 0x31);
            let address = 0x0801_0000 + 2048 * i as u32;
            assert_eq!(&packet[1..5], &address.to_be_bytes());
        }
        assert_eq!(writes[5], FINALIZE);
        assert_eq!(port.clear_count(), 1);
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_hex_blocks_ignore_base_address() {
        let image = image(ImageOrigin::Hex, &[0x0800_4000]);
        let port = MockPort::acking(4);

        session(port.clone(), &image, 0x1234_0000)
            .run(&mut crate::progress::NoProgress)
            .unwrap();

        assert_eq!(&port.writes()[2][1..5], &[0x08, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn test_block_two_not_acked() {
        init_logger();
        let image = image(ImageOrigin::Bin, &[0, 2048, 4096, 6144]);
        let mut replies = ACK.repeat(4);
        replies.extend_from_slice(&[0xEE, 0xEE]);
        let port = MockPort::new(&replies);
        let mut recorder = Recorder::default();

        let err = session(port.clone(), &image, 0x0801_0000)
            .run(&mut recorder)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::BlockAckFailed {
                index: 2,
                address: 0x0801_1000
            })
        ));
        assert_eq!(recorder.phases.last(), Some(&SessionPhase::Failed));
        assert!(!recorder.phases.contains(&SessionPhase::Transferring(3)));
        assert!(!recorder.phases.contains(&SessionPhase::Finalizing));
        // handshake, mode entry, blocks 0..=2
        assert_eq!(port.writes().len(), 5);
        assert_eq!(port.close_count(), 1);
        assert_eq!(recorder.values.last(), Some(&50));
    }

    #[test]
    fn test_disconnected_port_is_device_error() {
        let image = image(ImageOrigin::Bin, &[0]);
        let port = MockPort::acking(3);
        let mut unplugged = port.clone();
        unplugged.close().unwrap();
        let mut recorder = Recorder::default();

        let err = session(port.clone(), &image, 0)
            .run(&mut recorder)
            .unwrap_err();

        assert!(matches!(
            &err,
            Error::PortIo(e) if e.kind() == ErrorKind::NotConnected
        ));
        assert!(err.is_device_error());
        assert_eq!(recorder.phases.last(), Some(&SessionPhase::Failed));
        assert!(port.writes().is_empty());
    }

    #[test]
    fn test_handshake_timeout() {
        let image = image(ImageOrigin::Bin, &[0]);
        let port = MockPort::new(&[]);
        let mut recorder = Recorder::default();

        let err = session(port.clone(), &image, 0)
            .run(&mut recorder)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::HandshakeTimeout)
        ));
        assert_eq!(port.writes(), vec![HANDSHAKE.to_vec()]);
        assert!(recorder.values.is_empty());
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_mode_entry_short_reply() {
        let image = image(ImageOrigin::Bin, &[0]);
        let mut replies = ACK.to_vec();
        replies.push(0xCC);
        let port = MockPort::new(&replies);

        let err = session(port.clone(), &image, 0)
            .run(&mut crate::progress::NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(ProtocolError::ModeEntryFailed)));
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_finalize_reply_is_ignored() {
        let image = image(ImageOrigin::Bin, &[0]);
        // No reply at all to the finalize command.
        let port = MockPort::acking(3);
        session(port.clone(), &image, 0)
            .run(&mut crate::progress::NoProgress)
            .unwrap();

        let mut replies = ACK.repeat(3);
        replies.extend_from_slice(&[0x00, 0x13]);
        let port = MockPort::new(&replies);
        session(port.clone(), &image, 0)
            .run(&mut crate::progress::NoProgress)
            .unwrap();
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_cancel_between_blocks() {
        let image = image(ImageOrigin::Bin, &[0, 2048]);
        let port = MockPort::acking(4);
        let cancel = CancelToken::new();

        struct CancelAfterFirstBlock(CancelToken);
        impl ProgressSink for CancelAfterFirstBlock {
            fn set_label(&mut self, _text: &str) {}
            fn set_progress(&mut self, current: u64, _total: u64) {
                if current > PROGRESS_MODE_ENTRY {
                    self.0.cancel();
                }
            }
        }

        let err = session(port.clone(), &image, 0)
            .with_cancel_token(cancel.clone())
            .run(&mut CancelAfterFirstBlock(cancel.clone()))
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(cancel.is_cancelled());
        // handshake, mode entry, block 0 only
        assert_eq!(port.writes().len(), 3);
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_cancelled_phase_reported() {
        let image = image(ImageOrigin::Bin, &[0]);
        let port = MockPort::acking(3);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut recorder = Recorder::default();

        let err = session(port.clone(), &image, 0)
            .with_cancel_token(cancel)
            .run(&mut recorder)
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(recorder.phases.last(), Some(&SessionPhase::Cancelled));
        assert!(SessionPhase::Cancelled.is_terminal());
        assert_eq!(port.close_count(), 1);
    }

    #[test]
    fn test_bin_address_overflow() {
        let image = image(ImageOrigin::Bin, &[0, 2048]);
        let port = MockPort::acking(4);

        let err = session(port.clone(), &image, 0xFFFF_FC00)
            .run(&mut crate::progress::NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::UserInput(crate::error::UserInputError::AddressOverflow {
                index: 1,
                offset: 2048
            })
        ));
        assert_eq!(port.close_count(), 1);
    }
}
