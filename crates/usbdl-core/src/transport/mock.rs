//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{TransportError, UsbTransport};

/// One captured bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub endpoint: u8,
    /// Length the caller asked to send.
    pub requested: usize,
    /// Bytes the mock reported as accepted.
    pub transferred: usize,
    pub data: Vec<u8>,
}

/// Claim/release/close bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub claim: usize,
    pub release: usize,
    pub close: usize,
}

#[derive(Default)]
struct MockState {
    claimed: bool,
    closed: bool,
    counts: CallCounts,
    fail_claim: bool,
    /// Writes remaining before the next write fails; `None` never fails.
    fail_write_after: Option<usize>,
    /// Scripted `transferred` values, consumed before `max_write` applies.
    write_script: VecDeque<usize>,
    write_log: Vec<WriteRecord>,
    read_queue: VecDeque<Result<Vec<u8>, TransportError>>,
    read_calls: usize,
}

/// Mock transport for unit testing download logic.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns the other.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    product: Option<String>,
    /// Most bytes accepted by a single write.
    max_write: usize,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            product: None,
            max_write: usize::MAX,
            vid: 0x18D1,
            pid: 0x4F00,
        }
    }

    /// Report `product` as the USB product string.
    pub fn with_product(mut self, product: &str) -> Self {
        self.product = Some(product.to_string());
        self
    }

    /// Accept at most `max` bytes per write call.
    pub fn with_max_write(mut self, max: usize) -> Self {
        self.max_write = max;
        self
    }

    /// Make the next `claim_interface` fail with a busy error.
    pub fn fail_claim(&self) {
        self.state.lock().unwrap().fail_claim = true;
    }

    /// Let `n` writes succeed, then fail every following write.
    pub fn fail_write_after(&self, n: usize) {
        self.state.lock().unwrap().fail_write_after = Some(n);
    }

    /// Report these `transferred` values for the next writes, in order.
    pub fn script_writes(&self, transferred: &[usize]) {
        self.state
            .lock()
            .unwrap()
            .write_script
            .extend(transferred.iter().copied());
    }

    /// Queue data to be returned by the next read.
    pub fn queue_read(&self, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .read_queue
            .push_back(Ok(data.to_vec()));
    }

    /// Queue an error to be returned by the next read.
    pub fn queue_read_error(&self, error: TransportError) {
        self.state.lock().unwrap().read_queue.push_back(Err(error));
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<WriteRecord> {
        self.state.lock().unwrap().write_log.clone()
    }

    /// Concatenation of every accepted byte, in order.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.get_writes()
            .iter()
            .flat_map(|w| w.data[..w.transferred].iter().copied())
            .collect()
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().unwrap().read_calls
    }

    pub fn call_counts(&self) -> CallCounts {
        self.state.lock().unwrap().counts
    }

    pub fn is_claimed(&self) -> bool {
        self.state.lock().unwrap().claimed
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn product_string(&self) -> Option<String> {
        self.product.clone()
    }

    fn claim_interface(
        &mut self,
        interface: u8,
        _detach_kernel_driver: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.counts.claim += 1;
        if state.closed {
            return Err(TransportError::OpenFailed("device already closed".into()));
        }
        if state.fail_claim {
            return Err(TransportError::InterfaceBusy { interface });
        }
        state.claimed = true;
        Ok(())
    }

    fn release_interface(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.counts.release += 1;
        state.claimed = false;
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.counts.close += 1;
        state.claimed = false;
        state.closed = true;
    }

    fn bulk_write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.claimed {
            return Err(TransportError::InterfaceNotClaimed);
        }
        if let Some(remaining) = state.fail_write_after.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::WriteFailed("Stall: endpoint stalled".into()));
            }
            *remaining -= 1;
        }
        let transferred = state
            .write_script
            .pop_front()
            .unwrap_or_else(|| data.len().min(self.max_write));
        state.write_log.push(WriteRecord {
            endpoint,
            requested: data.len(),
            transferred,
            data: data.to_vec(),
        });
        Ok(transferred)
    }

    fn bulk_read(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.claimed {
            return Err(TransportError::InterfaceNotClaimed);
        }
        state.read_calls += 1;
        match state.read_queue.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
