//! TCP stream transport.
//!
//! One TCP endpoint backs both a source and a sink: the worker thread owns
//! the blocking read side and fills the ring buffer, the sink half writes
//! serialized frames to a clone of the same stream. Two modes:
//!
//! - **Listen**: bind, then accept one peer at a time, re-accepting after a
//!   disconnect.
//! - **Connect**: dial out, retrying every second until the peer appears,
//!   reconnecting after EOF or error.
//!
//! Reads carry a bounded timeout so the worker observes the terminate flag;
//! writes carry a bounded timeout so `route` never stalls the dispatch loop
//! past a bounded send attempt.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Socket, Type};
use tracing::{debug, info, warn};

use crate::codec::MAX_FRAME_LEN;
use crate::error::{GatewayError, Result};
use crate::pipeline::Pipeline;
use crate::ring::RingBuffer;
use crate::transport::{ByteSource, Message, MessageSink, SinkId, SourceId};

const RING_CAPACITY: usize = 4096;
const SCRATCH_SIZE: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Connection establishment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpMode {
    /// Bind and accept one peer.
    Listen,
    /// Dial the peer, retrying until it appears.
    Connect,
}

/// TCP endpoint configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub mode: TcpMode,
    pub host: String,
    pub port: u16,
}

struct TcpShared {
    cfg: TcpConfig,
    ring: Mutex<RingBuffer>,
    not_full: Condvar,
    /// Write side handle; present only while a peer is connected.
    stream: Mutex<Option<TcpStream>>,
    listener: Mutex<Option<TcpListener>>,
    terminate: AtomicBool,
}

impl TcpShared {
    fn new(cfg: TcpConfig) -> Self {
        Self {
            cfg,
            ring: Mutex::new(RingBuffer::new(RING_CAPACITY)),
            not_full: Condvar::new(),
            stream: Mutex::new(None),
            listener: Mutex::new(None),
            terminate: AtomicBool::new(false),
        }
    }

    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }

    fn drop_peer(&self) {
        *self.stream.lock() = None;
    }

    /// Install socket options and publish the write handle.
    fn adopt_peer(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        *self.stream.lock() = Some(stream.try_clone()?);
        Ok(())
    }

    /// Block (with polling) until a peer stream is available or terminate.
    fn acquire_peer(&self) -> Option<TcpStream> {
        match self.cfg.mode {
            TcpMode::Listen => {
                while !self.terminated() {
                    let accepted = self
                        .listener
                        .lock()
                        .as_ref()
                        .map(|listener| listener.accept());
                    match accepted {
                        Some(Ok((stream, peer))) => {
                            if let Err(e) = self.adopt_peer(&stream) {
                                warn!("tcp :{}: failed to adopt peer {}: {}", self.cfg.port, peer, e);
                                continue;
                            }
                            info!("tcp :{}: peer {} connected", self.cfg.port, peer);
                            return Some(stream);
                        }
                        Some(Err(ref e)) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL);
                        }
                        Some(Err(e)) => {
                            warn!("tcp :{}: accept failed: {}", self.cfg.port, e);
                            thread::sleep(RETRY_DELAY);
                        }
                        None => return None,
                    }
                }
                None
            }
            TcpMode::Connect => {
                let addr = format!("{}:{}", self.cfg.host, self.cfg.port);
                while !self.terminated() {
                    match TcpStream::connect(&addr) {
                        Ok(stream) => {
                            if let Err(e) = self.adopt_peer(&stream) {
                                warn!("tcp {}: failed to adopt connection: {}", addr, e);
                                thread::sleep(RETRY_DELAY);
                                continue;
                            }
                            info!("tcp {}: connected", addr);
                            return Some(stream);
                        }
                        Err(e) => {
                            debug!("tcp {}: connect failed ({}), retrying", addr, e);
                            thread::sleep(RETRY_DELAY);
                        }
                    }
                }
                None
            }
        }
    }
}

/// Blocking read loop: fill the ring buffer, hand bytes to the dispatch
/// loop through the non-blocking source face.
fn worker(shared: Arc<TcpShared>) {
    let mut scratch = [0u8; SCRATCH_SIZE];
    while !shared.terminated() {
        let mut stream = match shared.acquire_peer() {
            Some(stream) => stream,
            None => break,
        };
        while !shared.terminated() {
            match stream.read(&mut scratch) {
                Ok(0) => {
                    info!("tcp :{}: peer disconnected", shared.cfg.port);
                    shared.drop_peer();
                    break;
                }
                Ok(n) => {
                    let mut ring = shared.ring.lock();
                    ring.copy_from(&scratch[..n]);
                    while ring.is_full() && !shared.terminated() {
                        shared.not_full.wait_for(&mut ring, READ_TIMEOUT);
                    }
                }
                Err(ref e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("tcp :{}: read failed: {}", shared.cfg.port, e);
                    shared.drop_peer();
                    break;
                }
            }
        }
    }
}

struct TcpSource {
    shared: Arc<TcpShared>,
    worker: Option<JoinHandle<()>>,
}

impl ByteSource for TcpSource {
    fn init(&mut self) -> Result<()> {
        if self.shared.cfg.mode == TcpMode::Listen {
            let addr: SocketAddr = format!("{}:{}", self.shared.cfg.host, self.shared.cfg.port)
                .parse()
                .map_err(|_| GatewayError::InvalidParam("tcp listen address"))?;
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
            socket.set_reuse_address(true)?;
            socket.bind(&addr.into())?;
            socket.listen(1)?;
            let listener: TcpListener = socket.into();
            // Non-blocking accept lets the worker poll the terminate flag.
            listener.set_nonblocking(true)?;
            *self.shared.listener.lock() = Some(listener);
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("tcp-worker-{}", self.shared.cfg.port))
            .spawn(move || worker(shared))
            .map_err(|_| GatewayError::ThreadError("tcp worker spawn"))?;
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
        if let Some(stream) = self.shared.stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

struct TcpSink {
    shared: Arc<TcpShared>,
}

impl MessageSink for TcpSink {
    fn route(&mut self, msg: &Message) -> Result<()> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = msg.frame.to_wire(&mut buf);

        let mut guard = self.shared.stream.lock();
        let stream = match guard.as_mut() {
            Some(stream) => stream,
            None => {
                warn!(
                    "tcp :{}: message {} dropped, no peer to send to",
                    self.shared.cfg.port, msg.frame.msgid
                );
                return Ok(());
            }
        };
        if let Err(e) = stream.write_all(&buf[..len]) {
            // The worker re-establishes; this destination just missed.
            *guard = None;
            return Err(GatewayError::IoFault(e));
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(stream) = self.shared.stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Attach a TCP endpoint as `source` and `sink`. The listener is bound (or
/// the dial loop started) at connect time by the source half's init.
pub fn hook_tcp(
    pipeline: &mut Pipeline,
    cfg: TcpConfig,
    source: SourceId,
    sink: SinkId,
) -> Result<()> {
    let shared = Arc::new(TcpShared::new(cfg));
    pipeline.attach_source(
        source,
        Box::new(TcpSource {
            shared: Arc::clone(&shared),
            worker: None,
        }),
    );
    pipeline.attach_sink(sink, Box::new(TcpSink { shared }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Heartbeat;
    use std::net::TcpListener as StdListener;

    fn heartbeat() -> Message {
        let frame = Heartbeat {
            custom_mode: 3,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        }
        .encode(1, 1, 0);
        Message::new(frame, SourceId::Vmc)
    }

    /// A connect-mode endpoint reaches a local listener: bytes written by
    /// the peer surface through the source face, frames routed to the sink
    /// face arrive at the peer.
    #[test]
    fn connect_mode_round_trip() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let shared = Arc::new(TcpShared::new(TcpConfig {
            mode: TcpMode::Connect,
            host: "127.0.0.1".into(),
            port,
        }));
        let mut source = TcpSource {
            shared: Arc::clone(&shared),
            worker: None,
        };
        let mut sink = TcpSink {
            shared: Arc::clone(&shared),
        };

        source.init().unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // Peer -> source face.
        peer.write_all(&[0x11, 0x22]).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !source.has_more() {
            assert!(std::time::Instant::now() < deadline, "bytes never arrived");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(source.read_byte(), 0x11);
        assert!(source.has_more());
        assert_eq!(source.read_byte(), 0x22);

        // Sink face -> peer.
        let msg = heartbeat();
        sink.route(&msg).unwrap();
        let mut wire = vec![0u8; msg.frame.wire_len()];
        peer.read_exact(&mut wire).unwrap();
        assert_eq!(wire, msg.frame.to_bytes());

        source.cleanup();
        sink.cleanup();
    }

    /// Routing with no peer connected drops with a warning, not an error.
    #[test]
    fn route_without_peer_drops() {
        let shared = Arc::new(TcpShared::new(TcpConfig {
            mode: TcpMode::Connect,
            host: "127.0.0.1".into(),
            port: 1,
        }));
        let mut sink = TcpSink { shared };
        assert!(sink.route(&heartbeat()).is_ok());
    }
}
