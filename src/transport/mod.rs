//! # Transport Abstraction and Registries
//!
//! This module defines the shared data model of the gateway (the in-flight
//! [`Message`] and the source and sink identifier spaces) and the adapter
//! contract every concrete transport implements. Adapters live in fixed-size
//! slot arrays keyed by identifier, so the fan-out path resolves a bitmap bit
//! to an adapter by plain array indexing.
//!
//! ## Adapter Contract
//!
//! A [`ByteSource`] presents a strictly non-blocking byte view to the
//! dispatch loop: `has_more` is the sole synchronization point against any
//! background worker the transport owns, and `read_byte` returns one locally
//! buffered byte without ever blocking. A [`MessageSink`] consumes one routed
//! message per `route` call with a bounded send attempt. Neither side panics
//! on transport faults: sources degrade to "no more bytes right now", sinks
//! return [`GatewayError::IoFault`](crate::error::GatewayError) which the
//! engine logs before moving to the next destination.
//!
//! ## Transports
//!
//! - [`tcp`]: stream socket, listen or connect-out, worker + ring buffer
//! - [`udp`]: datagram socket, worker + ring buffer, last-peer replies
//! - [`serial`]: UART line via termios, worker + ring buffer
//! - [`stdio`]: stdout summary sink (the default DISCARD destination)
//! - [`loopback`]: in-process channel pair for tests and simulation
//!
//! Each transport exposes a `hook_*` function that builds its state, wires
//! the worker, and attaches the source and/or sink halves to the pipeline.
//! A hook that fails returns the error without registering anything.

use std::fmt;

use crate::bitmap::SinkSet;
use crate::codec::{MavFrame, MavParser};
use crate::error::Result;
use crate::transform::Transformer;

pub mod loopback;
pub mod serial;
pub mod stdio;
pub mod tcp;
pub mod udp;

pub use loopback::{hook_loopback, hook_loopback_sink, LoopbackHandle};
pub use serial::{hook_serial, SerialConfig};
pub use stdio::hook_stdio_sink;
pub use tcp::{hook_tcp, TcpConfig, TcpMode};
pub use udp::{hook_udp, UdpConfig};

/// Number of source slots. Identifiers are dense from zero.
pub const MAX_SOURCES: usize = 4;
/// Number of sink slots. Identifiers are dense from zero.
pub const MAX_SINKS: usize = 4;

/// Source endpoint identifiers for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum SourceId {
    /// Reserved null slot; its route row is empty.
    Null = 0,
    /// Vehicle/mission computer.
    Vmc = 1,
    /// Untrusted legacy peer.
    Legacy = 2,
    /// Enclave peer.
    Enclave = 3,
}

impl SourceId {
    pub const ALL: [SourceId; MAX_SOURCES] =
        [SourceId::Null, SourceId::Vmc, SourceId::Legacy, SourceId::Enclave];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceId::Null => "null",
            SourceId::Vmc => "vmc",
            SourceId::Legacy => "legacy",
            SourceId::Enclave => "enclave",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sink endpoint identifiers for this deployment.
///
/// `Discard` is reserved: once set on a message's sink set, every other
/// destination is cancelled and the message goes (at most) to the discard
/// sink for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum SinkId {
    Discard = 0,
    Vmc = 1,
    Enclave = 2,
    Legacy = 3,
}

impl SinkId {
    pub const ALL: [SinkId; MAX_SINKS] =
        [SinkId::Discard, SinkId::Vmc, SinkId::Enclave, SinkId::Legacy];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SinkId::Discard => "discard",
            SinkId::Vmc => "vmc",
            SinkId::Enclave => "enclave",
            SinkId::Legacy => "legacy",
        }
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One in-flight message: the parsed frame plus routing metadata.
///
/// Attribute bits are free-form per-message tags written by policies; they
/// accumulate monotonically during one pipeline traversal and are reset when
/// a new frame completes in the owning parse slot.
#[derive(Debug, Clone)]
pub struct Message {
    pub frame: MavFrame,
    pub source: SourceId,
    pub sinks: SinkSet,
    pub attribute: u64,
}

impl Message {
    pub fn new(frame: MavFrame, source: SourceId) -> Self {
        Self {
            frame,
            source,
            sinks: SinkSet::new(),
            attribute: 0,
        }
    }
}

/// Byte-stream input endpoint on one transport.
pub trait ByteSource: Send {
    /// One-shot setup (bind, spawn worker). An error makes the adapter
    /// unusable for the rest of the process.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// True iff `read_byte` will return a byte without blocking the
    /// dispatch loop. Transport faults surface as `false`.
    fn has_more(&mut self) -> bool;

    /// One buffered byte. Only meaningful directly after `has_more`
    /// returned true; never blocks.
    fn read_byte(&mut self) -> u8;

    /// One-shot teardown (terminate worker, release the port).
    fn cleanup(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Message output endpoint on one transport.
pub trait MessageSink: Send {
    /// One-shot setup. An error makes the adapter unusable for the rest of
    /// the process.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Consume one message with a bounded send attempt. May enqueue
    /// internally or drop with a warning; must not stall the dispatch loop.
    fn route(&mut self, msg: &Message) -> Result<()>;

    fn cleanup(&mut self) {}

    fn name(&self) -> &'static str;
}

/// A registered source: adapter plus the per-slot parse state.
///
/// The parse slot (`msg`) is owned by the slot and reused in place; it is
/// only touched while the dispatch loop iterates the owning source.
pub struct SourceSlot {
    pub(crate) id: SourceId,
    pub(crate) failed: bool,
    pub(crate) parser: MavParser,
    pub(crate) msg: Message,
    pub(crate) transform: Option<Transformer>,
    pub(crate) adapter: Box<dyn ByteSource>,
}

impl SourceSlot {
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// True once `init` has failed; the slot is skipped from then on.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// A registered sink: adapter plus its optional transformer.
pub struct SinkSlot {
    pub(crate) id: SinkId,
    pub(crate) failed: bool,
    pub(crate) transform: Option<Transformer>,
    pub(crate) adapter: Box<dyn MessageSink>,
}

impl SinkSlot {
    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// Fixed-size source slot array keyed by [`SourceId`].
pub struct SourceRegistry {
    slots: [Option<SourceSlot>; MAX_SOURCES],
}

impl SourceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Reserve the named slot. Allocating an occupied slot is a programming
    /// error and halts the process.
    pub fn allocate(&mut self, id: SourceId, adapter: Box<dyn ByteSource>) -> &mut SourceSlot {
        let slot = &mut self.slots[id.index()];
        assert!(slot.is_none(), "source slot {} already allocated", id);
        *slot = Some(SourceSlot {
            id,
            failed: false,
            parser: MavParser::new(id.index() as u8),
            msg: Message::new(MavFrame::default(), id),
            transform: None,
            adapter,
        });
        slot.as_mut().expect("slot just filled")
    }

    pub fn get(&self, id: SourceId) -> Option<&SourceSlot> {
        self.slots[id.index()].as_ref()
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut SourceSlot> {
        self.slots[id.index()].as_mut()
    }

    /// Occupied slots in ascending identifier order.
    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut SourceSlot> {
        self.slots.iter_mut().flatten()
    }
}

/// Fixed-size sink slot array keyed by [`SinkId`].
pub struct SinkRegistry {
    slots: [Option<SinkSlot>; MAX_SINKS],
}

impl SinkRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Reserve the named slot. Allocating an occupied slot is a programming
    /// error and halts the process.
    pub fn allocate(&mut self, id: SinkId, adapter: Box<dyn MessageSink>) -> &mut SinkSlot {
        let slot = &mut self.slots[id.index()];
        assert!(slot.is_none(), "sink slot {} already allocated", id);
        *slot = Some(SinkSlot {
            id,
            failed: false,
            transform: None,
            adapter,
        });
        slot.as_mut().expect("slot just filled")
    }

    pub fn get(&self, id: SinkId) -> Option<&SinkSlot> {
        self.slots[id.index()].as_ref()
    }

    pub fn get_mut(&mut self, id: SinkId) -> Option<&mut SinkSlot> {
        self.slots[id.index()].as_mut()
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = &mut SinkSlot> {
        self.slots.iter_mut().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSource;
    impl ByteSource for NullSource {
        fn has_more(&mut self) -> bool {
            false
        }
        fn read_byte(&mut self) -> u8 {
            0
        }
        fn name(&self) -> &'static str {
            "null"
        }
    }

    #[test]
    fn identifier_spaces_are_dense_from_zero() {
        for (i, id) in SourceId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(SourceId::from_index(i), Some(*id));
        }
        for (i, id) in SinkId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(SinkId::from_index(i), Some(*id));
        }
        assert_eq!(SourceId::from_index(MAX_SOURCES), None);
        assert_eq!(SinkId::from_index(MAX_SINKS), None);
        assert_eq!(SinkId::Discard.index(), 0);
    }

    #[test]
    fn registry_lookup_is_slot_indexed() {
        let mut reg = SourceRegistry::new();
        assert!(reg.get(SourceId::Legacy).is_none());
        reg.allocate(SourceId::Legacy, Box::new(NullSource));
        assert_eq!(reg.get(SourceId::Legacy).unwrap().id(), SourceId::Legacy);
        assert!(reg.get(SourceId::Vmc).is_none());
        let ordered: Vec<SourceId> = {
            reg.allocate(SourceId::Vmc, Box::new(NullSource));
            reg.slots_mut().map(|s| s.id()).collect()
        };
        assert_eq!(ordered, vec![SourceId::Vmc, SourceId::Legacy]);
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn double_allocation_panics() {
        let mut reg = SourceRegistry::new();
        reg.allocate(SourceId::Vmc, Box::new(NullSource));
        reg.allocate(SourceId::Vmc, Box::new(NullSource));
    }
}
