//! In-process message-bus transport.
//!
//! A loopback endpoint is a crossbeam channel pair: the test or simulation
//! side injects raw wire bytes into the source half and collects whatever
//! the pipeline routes into the sink half. The dispatch loop sees the same
//! non-blocking byte contract as any socket transport.

use std::collections::VecDeque;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::transport::{ByteSource, Message, MessageSink, SinkId, SourceId};

/// Test-side handle to a hooked loopback endpoint.
pub struct LoopbackHandle {
    bytes_tx: Sender<Vec<u8>>,
    routed_rx: Receiver<Message>,
}

impl LoopbackHandle {
    /// Inject raw wire bytes into the source half.
    pub fn inject(&self, bytes: &[u8]) {
        self.bytes_tx
            .send(bytes.to_vec())
            .expect("loopback source dropped");
    }

    /// Next message the pipeline routed to the sink half, if any.
    pub fn try_recv(&self) -> Option<Message> {
        self.routed_rx.try_recv().ok()
    }

    /// Block up to `timeout` for a routed message.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<Message> {
        self.routed_rx.recv_timeout(timeout).ok()
    }

    /// Number of routed messages currently queued.
    pub fn pending(&self) -> usize {
        self.routed_rx.len()
    }
}

struct LoopbackSource {
    bytes_rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl ByteSource for LoopbackSource {
    fn has_more(&mut self) -> bool {
        if self.pending.is_empty() {
            match self.bytes_rx.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        !self.pending.is_empty()
    }

    fn read_byte(&mut self) -> u8 {
        self.pending.pop_front().unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

struct LoopbackSink {
    routed_tx: Sender<Message>,
}

impl MessageSink for LoopbackSink {
    fn route(&mut self, msg: &Message) -> Result<()> {
        // The peer dropping its handle is not a transport fault for an
        // in-process bus; the message just has nowhere to go.
        let _ = self.routed_tx.send(msg.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Attach a loopback source/sink pair and return the test-side handle.
pub fn hook_loopback(pipeline: &mut Pipeline, source: SourceId, sink: SinkId) -> LoopbackHandle {
    let (bytes_tx, bytes_rx) = unbounded();
    let (routed_tx, routed_rx) = unbounded();
    pipeline.attach_source(
        source,
        Box::new(LoopbackSource {
            bytes_rx,
            pending: VecDeque::new(),
        }),
    );
    pipeline.attach_sink(sink, Box::new(LoopbackSink { routed_tx }));
    LoopbackHandle {
        bytes_tx,
        routed_rx,
    }
}

/// Attach only the sink half; useful when a role has no inbound traffic.
pub fn hook_loopback_sink(pipeline: &mut Pipeline, sink: SinkId) -> LoopbackHandle {
    let (bytes_tx, _bytes_rx) = unbounded();
    let (routed_tx, routed_rx) = unbounded();
    pipeline.attach_sink(sink, Box::new(LoopbackSink { routed_tx }));
    LoopbackHandle {
        bytes_tx,
        routed_rx,
    }
}
