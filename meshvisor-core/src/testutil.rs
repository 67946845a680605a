//! In-process network double for exercising [`crate::transport`] without a
//! real NIC backend.
//!
//! `transport` resolves its NIC, handler table, and reply slots through
//! process-wide statics, so a single test binary can only stand up one
//! logical node at a time; this harness loops a node's own frames back to
//! itself rather than simulating a second peer.

use alloc::collections::VecDeque;

use spin::Mutex;

use meshvisor_hal::nic::{EthernetNic, NicError};

/// Loopback NIC: every frame handed to [`EthernetNic::send_frame`] is queued
/// and returned verbatim by the next matching [`EthernetNic::recv_frame`].
pub struct LoopbackNic {
    mac: [u8; 6],
    mtu: usize,
    queue: Mutex<VecDeque<alloc::vec::Vec<u8>>>,
}

impl LoopbackNic {
    pub fn new(mac: [u8; 6], mtu: usize) -> Self {
        Self { mac, mtu, queue: Mutex::new(VecDeque::new()) }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl EthernetNic for LoopbackNic {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn send_frame(&self, frame: &[u8]) -> Result<(), NicError> {
        if frame.len() > self.mtu {
            return Err(NicError::InvalidParam);
        }
        self.queue.lock().push_back(frame.to_vec());
        Ok(())
    }

    fn recv_frame(&self, _ethertype: u16, buf: &mut [u8]) -> Result<usize, NicError> {
        let mut q = self.queue.lock();
        match q.pop_front() {
            Some(frame) => {
                if frame.len() > buf.len() {
                    return Err(NicError::InvalidParam);
                }
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Err(NicError::NoFrame),
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_returns_what_was_sent() {
        let nic = LoopbackNic::new([1, 2, 3, 4, 5, 6], 4160);
        nic.send_frame(&[0xaa; 70]).unwrap();
        assert_eq!(nic.pending(), 1);
        let mut buf = [0u8; 4160];
        let n = nic.recv_frame(0x0019, &mut buf).unwrap();
        assert_eq!(n, 70);
        assert!(buf[..70].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn recv_on_empty_queue_reports_no_frame() {
        let nic = LoopbackNic::new([0; 6], 4160);
        let mut buf = [0u8; 64];
        assert_eq!(nic.recv_frame(0x0019, &mut buf), Err(NicError::NoFrame));
    }
}
