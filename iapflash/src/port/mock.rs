//! In-memory port for driving the download session in tests.

use {
    crate::{error::Result, port::Port, protocol::iap::ACK},
    std::{
        collections::VecDeque,
        io::{Read, Write},
        sync::{Arc, Mutex, MutexGuard},
    },
};

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    cleared: usize,
    closes: usize,
    open: bool,
}

/// Mock port with a scripted reply queue and a write log.
///
/// Reads past the end of the script time out. Clones share state, so a test
/// can keep one clone while the session owns another.
#[derive(Debug, Clone)]
pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    pub(crate) fn new(replies: &[u8]) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                replies: replies.iter().copied().collect(),
                open: true,
                ..MockState::default()
            })),
        }
    }

    /// A device that acknowledges the first `frames` host frames.
    pub(crate) fn acking(frames: usize) -> Self {
        Self::new(&ACK.repeat(frames))
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Frames written so far, one entry per write call.
    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state().closes
    }

    pub(crate) fn clear_count(&self) -> usize {
        self.state().cleared
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if state.replies.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.replies.len());
        for b in buf.iter_mut().take(n) {
            *b = state.replies.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if !state.open {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ));
        }
        state.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.state().cleared += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_close_is_noop() {
        let mut port = MockPort::new(&[]);
        port.close().unwrap();
        port.close().unwrap();
        assert_eq!(port.close_count(), 1);
        assert!(port.write_all_bytes(&[0x5A]).is_err());
    }

    #[test]
    fn test_exhausted_script_times_out() {
        let mut port = MockPort::new(&[0xCC]);
        let mut reply = [0u8; 2];
        let err = port.read_exact(&mut reply).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
