//! UDP datagram transport.
//!
//! One bound socket backs both halves: the worker thread blocks in
//! `recv_from` (with a bounded timeout) and copies datagrams into the ring
//! buffer; the sink half serializes frames and replies to the last peer the
//! worker heard from. Until a peer has been seen there is nowhere to send,
//! so outbound messages are dropped with a warning.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::codec::MAX_FRAME_LEN;
use crate::error::{GatewayError, Result};
use crate::pipeline::Pipeline;
use crate::ring::RingBuffer;
use crate::transport::{ByteSource, Message, MessageSink, SinkId, SourceId};

const RING_CAPACITY: usize = 4096;
const SCRATCH_SIZE: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// UDP endpoint configuration.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub host: String,
    pub port: u16,
}

struct UdpShared {
    port: u16,
    socket: UdpSocket,
    ring: Mutex<RingBuffer>,
    not_full: Condvar,
    peer: Mutex<Option<SocketAddr>>,
    terminate: AtomicBool,
}

impl UdpShared {
    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }
}

fn worker(shared: Arc<UdpShared>) {
    let mut scratch = [0u8; SCRATCH_SIZE];
    while !shared.terminated() {
        match shared.socket.recv_from(&mut scratch) {
            Ok((n, peer)) => {
                *shared.peer.lock() = Some(peer);
                let mut ring = shared.ring.lock();
                ring.copy_from(&scratch[..n]);
                while ring.is_full() && !shared.terminated() {
                    shared.not_full.wait_for(&mut ring, READ_TIMEOUT);
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Timeout tick; re-check the terminate flag.
            }
            Err(e) => {
                warn!("udp :{}: recv failed: {}", shared.port, e);
            }
        }
    }
}

struct UdpSource {
    shared: Arc<UdpShared>,
    worker: Option<JoinHandle<()>>,
}

impl ByteSource for UdpSource {
    fn init(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("udp-worker-{}", self.shared.port))
            .spawn(move || worker(shared))
            .map_err(|_| GatewayError::ThreadError("udp worker spawn"))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn has_more(&mut self) -> bool {
        !self.shared.ring.lock().is_empty()
    }

    fn read_byte(&mut self) -> u8 {
        let mut ring = self.shared.ring.lock();
        let byte = ring.pop().unwrap_or(0);
        self.shared.not_full.notify_one();
        byte
    }

    fn cleanup(&mut self) {
        self.shared.terminate.store(true, Ordering::Relaxed);
        self.shared.not_full.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

struct UdpSink {
    shared: Arc<UdpShared>,
}

impl MessageSink for UdpSink {
    fn route(&mut self, msg: &Message) -> Result<()> {
        let peer = match *self.shared.peer.lock() {
            Some(peer) => peer,
            None => {
                warn!(
                    "udp :{}: message {} dropped, no peer seen yet",
                    self.shared.port, msg.frame.msgid
                );
                return Ok(());
            }
        };
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = msg.frame.to_wire(&mut buf);
        let sent = self.shared.socket.send_to(&buf[..len], peer)?;
        if sent < len {
            warn!(
                "udp :{}: short datagram to {} ({} / {} bytes)",
                self.shared.port, peer, sent, len
            );
            return Err(GatewayError::IoFault(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short datagram send",
            )));
        }
        debug!("udp :{}: {} bytes to {}", self.shared.port, len, peer);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "udp"
    }
}

/// Bind a UDP endpoint and attach it as `source` and `sink`. Bind failures
/// are reported to the caller and nothing is registered.
pub fn hook_udp(
    pipeline: &mut Pipeline,
    cfg: UdpConfig,
    source: SourceId,
    sink: SinkId,
) -> Result<()> {
    let socket = UdpSocket::bind((cfg.host.as_str(), cfg.port))?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    let shared = Arc::new(UdpShared {
        port: cfg.port,
        socket,
        ring: Mutex::new(RingBuffer::new(RING_CAPACITY)),
        not_full: Condvar::new(),
        peer: Mutex::new(None),
        terminate: AtomicBool::new(false),
    });
    pipeline.attach_source(
        source,
        Box::new(UdpSource {
            shared: Arc::clone(&shared),
            worker: None,
        }),
    );
    pipeline.attach_sink(sink, Box::new(UdpSink { shared }));
    Ok(())
}
