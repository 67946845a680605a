//! Raw-Ethernet NIC abstraction used by the cluster message transport.
//!
//! The coherence protocol rides directly on Ethernet frames (EtherType
//! `0x0019`, see the transport wire format) rather than a routed network
//! stack, so the capability surface a backend must provide is small: send
//! one frame, and drain whatever has arrived.

#![allow(dead_code)]

/// Error codes for NIC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicError {
    NotSupported,
    InvalidParam,
    QueueFull,
    NoFrame,
    HardwareFault,
}

/// Trait representing a raw-frame capable network interface.
/// Implemented by an architecture/board specific back-end and resolved
/// once at boot; the cluster transport never constructs one itself.
pub trait EthernetNic: Send + Sync {
    /// This interface's MAC address.
    fn mac_address(&self) -> [u8; 6];

    /// Transmit one raw Ethernet frame (header through payload, no FCS).
    fn send_frame(&self, frame: &[u8]) -> Result<(), NicError>;

    /// Receive the next queued frame matching `ethertype`, if any, into
    /// `buf`. Returns the number of bytes written. Non-blocking.
    fn recv_frame(&self, ethertype: u16, buf: &mut [u8]) -> Result<usize, NicError>;

    /// Query the maximum frame payload this interface supports.
    fn mtu(&self) -> usize;
}
