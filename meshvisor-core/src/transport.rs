//! Typed message transport carried over raw Ethernet frames.
//!
//! Every cluster message is a fixed 64-byte header (sender node id, message
//! type, reserved padding) followed by a `postcard`-encoded payload. Delivery
//! is fire-and-forget (`send`) or blocking request/reply (`send_and_wait_reply`),
//! matching the two calling conventions the coherence engine and the bring-up
//! handshake need.

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};
use spin::{Mutex, Once};

use crate::cluster::NodeId;

/// EtherType carried by every cluster message frame.
pub const ETHERTYPE_MESHVISOR: u16 = 0x0019;

const HEADER_LEN: usize = 64;
/// Large enough to carry a full 4 KiB page fetch reply in one frame.
/// Requires a jumbo-frame-capable backend; `EthernetNic::mtu()` exists so a
/// caller can check this before calling `init`.
const MAX_FRAME: usize = 4160;
const MAX_PAYLOAD: usize = MAX_FRAME - HEADER_LEN;
pub const MAX_PAYLOAD_LEN: usize = MAX_PAYLOAD;

/// Cluster message discriminants. Values match the reference wire format so
/// that a packet capture of either side demuxes the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum MsgType {
    Init = 0x1,
    InitAck = 0x2,
    ClusterInfo = 0x3,
    SetupDone = 0x4,
    CpuWakeup = 0x5,
    CpuWakeupAck = 0x6,
    Shutdown = 0x7,
    Fetch = 0x8,
    FetchReply = 0x9,
    Invalidate = 0xa,
    InvalidateAck = 0xb,
    Interrupt = 0xc,
    MmioRequest = 0xd,
    MmioReply = 0xe,
    GicConfig = 0xf,
    Sgi = 0x10,
}

impl MsgType {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x1 => MsgType::Init,
            0x2 => MsgType::InitAck,
            0x3 => MsgType::ClusterInfo,
            0x4 => MsgType::SetupDone,
            0x5 => MsgType::CpuWakeup,
            0x6 => MsgType::CpuWakeupAck,
            0x7 => MsgType::Shutdown,
            0x8 => MsgType::Fetch,
            0x9 => MsgType::FetchReply,
            0xa => MsgType::Invalidate,
            0xb => MsgType::InvalidateAck,
            0xc => MsgType::Interrupt,
            0xd => MsgType::MmioRequest,
            0xe => MsgType::MmioReply,
            0xf => MsgType::GicConfig,
            0x10 => MsgType::Sgi,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    src_nodeid: u32,
    msg_type: u32,
}

impl FrameHeader {
    fn encode(&self, buf: &mut [u8; HEADER_LEN]) {
        buf[0..4].copy_from_slice(&self.src_nodeid.to_le_bytes());
        buf[4..8].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[8..].fill(0);
    }

    fn decode(buf: &[u8; HEADER_LEN]) -> Option<Self> {
        let src_nodeid = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let msg_type = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        Some(Self { src_nodeid, msg_type })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NoNic,
    PayloadTooLarge,
    EncodeFailed,
    DecodeFailed,
    UnknownMsgType,
    Timeout,
    NoFrame,
    Nic,
}

impl From<meshvisor_hal::nic::NicError> for TransportError {
    fn from(_: meshvisor_hal::nic::NicError) -> Self {
        TransportError::Nic
    }
}

/// Handler invoked for an inbound message not claimed by a pending
/// `send_and_wait_reply` slot. Registered by the modules that own each
/// message type (coherence engine, vGIC, cluster bring-up).
pub type Handler = fn(NodeId, &[u8]);

struct HandlerTable {
    slots: Mutex<[Option<Handler>; 17]>,
}

static HANDLERS: HandlerTable = HandlerTable {
    slots: Mutex::new([None; 17]),
};

fn msg_index(t: MsgType) -> usize {
    t as u32 as usize
}

/// Register the handler invoked for unsolicited messages of type `t`.
/// Replaces any previously registered handler.
pub fn register_handler(t: MsgType, h: Handler) {
    HANDLERS.slots.lock()[msg_index(t)] = Some(h);
}

/// One slot per message type: `send_and_wait_reply` is matched against an
/// inbound frame by the *reply's* type, not by which node actually sends it,
/// since a forwarded request (node0 asks node1, node1 asks node2, node2
/// replies straight to node0) means the replier is not always the node the
/// original request was sent to.
struct ReplySlot {
    waiting: AtomicBool,
    filled: AtomicBool,
    payload: Mutex<HVec<u8, MAX_PAYLOAD>>,
}

struct ReplyTable {
    slots: [ReplySlot; 17],
}

static REPLIES: ReplyTable = ReplyTable {
    slots: [const {
        ReplySlot {
            waiting: AtomicBool::new(false),
            filled: AtomicBool::new(false),
            payload: Mutex::new(HVec::new()),
        }
    }; 17],
};

static NIC: Once<&'static dyn meshvisor_hal::nic::EthernetNic> = Once::new();

/// Bind the network device used for all cluster traffic. Idempotent.
pub fn init(nic: &'static dyn meshvisor_hal::nic::EthernetNic) {
    NIC.call_once(|| nic);
}

fn nic() -> Result<&'static dyn meshvisor_hal::nic::EthernetNic, TransportError> {
    NIC.get().copied().ok_or(TransportError::NoNic)
}

/// Send `payload` to `dest` as a fire-and-forget message. Does not wait for
/// any acknowledgement.
pub fn send(dest: NodeId, msg_type: MsgType, payload: &[u8]) -> Result<(), TransportError> {
    let _ = dest; // routing is MAC-based; resolved by the caller via cluster::global()
    if payload.len() > MAX_PAYLOAD {
        return Err(TransportError::PayloadTooLarge);
    }
    let local = crate::cluster::global().local_nodeid();
    let header = FrameHeader {
        src_nodeid: local.0,
        msg_type: msg_type as u32,
    };
    let mut frame = [0u8; MAX_FRAME];
    let mut hdr_bytes = [0u8; HEADER_LEN];
    header.encode(&mut hdr_bytes);
    frame[..HEADER_LEN].copy_from_slice(&hdr_bytes);
    frame[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    nic()?.send_frame(&frame[..HEADER_LEN + payload.len()])?;
    Ok(())
}

/// Poll the NIC once, dispatching any received frame either to a blocked
/// `send_and_wait_reply` caller or to the registered handler for its type.
/// Returns `Ok(true)` if a frame was processed.
pub fn poll() -> Result<bool, TransportError> {
    let mut buf = [0u8; MAX_FRAME];
    let n = match nic()?.recv_frame(ETHERTYPE_MESHVISOR, &mut buf) {
        Ok(n) => n,
        Err(meshvisor_hal::nic::NicError::NoFrame) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if n < HEADER_LEN {
        return Err(TransportError::DecodeFailed);
    }
    let hdr_bytes: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
    let header = FrameHeader::decode(&hdr_bytes).ok_or(TransportError::DecodeFailed)?;
    let msg_type = MsgType::from_u32(header.msg_type).ok_or(TransportError::UnknownMsgType)?;
    let payload = &buf[HEADER_LEN..n];
    let src = NodeId(header.src_nodeid);

    let slot = &REPLIES.slots[msg_index(msg_type)];
    if slot.waiting.load(Ordering::Acquire) && !slot.filled.load(Ordering::Acquire) {
        let mut dst = slot.payload.lock();
        dst.clear();
        let _ = dst.extend_from_slice(payload);
        slot.filled.store(true, Ordering::Release);
        return Ok(true);
    }

    if let Some(h) = HANDLERS.slots.lock()[msg_index(msg_type)] {
        h(src, payload);
    }
    Ok(true)
}

/// Send `payload` to `dest` and block until a message of type `reply_type`
/// arrives (from whichever node ends up answering), or `max_spins` polls
/// elapse without one. Only one outstanding wait per reply type is
/// supported, matching the single in-flight fetch per page the coherence
/// engine issues.
pub type ReplyBuf = HVec<u8, MAX_PAYLOAD>;

pub fn send_and_wait_reply(
    dest: NodeId,
    msg_type: MsgType,
    payload: &[u8],
    reply_type: MsgType,
    max_spins: u32,
) -> Result<ReplyBuf, TransportError> {
    let slot = &REPLIES.slots[msg_index(reply_type)];
    slot.filled.store(false, Ordering::Release);
    slot.waiting.store(true, Ordering::Release);

    let result = send(dest, msg_type, payload).and_then(|()| {
        for _ in 0..max_spins {
            if slot.filled.load(Ordering::Acquire) {
                return Ok(slot.payload.lock().clone());
            }
            match poll() {
                Ok(_) => {}
                Err(TransportError::NoNic) => return Err(TransportError::NoNic),
                Err(_) => core::hint::spin_loop(),
            }
        }
        Err(TransportError::Timeout)
    });

    slot.waiting.store(false, Ordering::Release);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = FrameHeader { src_nodeid: 7, msg_type: MsgType::Fetch as u32 };
        let mut buf = [0u8; HEADER_LEN];
        h.encode(&mut buf);
        let back = FrameHeader::decode(&buf).unwrap();
        assert_eq!(back.src_nodeid, 7);
        assert_eq!(back.msg_type, MsgType::Fetch as u32);
    }

    #[test]
    fn msg_type_round_trips_all_variants() {
        for v in [0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8, 0x9, 0xa, 0xb, 0xc, 0xd, 0xe, 0xf, 0x10] {
            assert!(MsgType::from_u32(v).is_some());
        }
        assert!(MsgType::from_u32(0xff).is_none());
    }
}
