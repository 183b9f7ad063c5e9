//! Serial (UART) transport.
//!
//! Opens a tty device in raw 8N1 mode at the configured baud rate. The
//! worker thread blocks in `read` with a VTIME-bounded timeout (so it can
//! observe the terminate flag) and fills the ring buffer; the sink half
//! writes serialized frames through a clone of the device handle.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::termios::{
    self, BaudRate, ControlFlags, SetArg, SpecialCharacterIndices,
};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::codec::MAX_FRAME_LEN;
use crate::error::{GatewayError, Result};
use crate::pipeline::Pipeline;
use crate::ring::RingBuffer;
use crate::transport::{ByteSource, Message, MessageSink, SinkId, SourceId};

const RING_CAPACITY: usize = 4096;
const SCRATCH_SIZE: usize = 256;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Serial endpoint configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: PathBuf,
    pub baud: u32,
}

fn baud_rate(baud: u32) -> Result<BaudRate> {
    Ok(match baud {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        _ => return Err(GatewayError::InvalidParam("unsupported baud rate")),
    })
}

fn nix_io(errno: nix::errno::Errno) -> GatewayError {
    GatewayError::IoFault(std::io::Error::from_raw_os_error(errno as i32))
}

/// Open the device and put the line into raw 8N1 mode. A read blocks for at
/// most half a second (VTIME) so the worker can poll termination.
fn open_device(cfg: &SerialConfig) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(nix::libc::O_NOCTTY)
        .open(&cfg.device)?;

    let mut options = termios::tcgetattr(&file).map_err(nix_io)?;
    termios::cfmakeraw(&mut options);
    options.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    options.control_flags &=
        !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CRTSCTS);
    options.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    options.control_chars[SpecialCharacterIndices::VTIME as usize] = 5;
    termios::cfsetspeed(&mut options, baud_rate(cfg.baud)?).map_err(nix_io)?;
    termios::tcsetattr(&file, SetArg::TCSANOW, &options).map_err(nix_io)?;
    Ok(file)
}

struct SerialShared {
    device: PathBuf,
    ring: Mutex<RingBuffer>,
    not_full: Condvar,
    writer: Mutex<Option<File>>,
    terminate: AtomicBool,
}

impl SerialShared {
    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Relaxed)
    }
}

fn worker(shared: Arc<SerialShared>, mut device: File) {
    let mut scratch = [0u8; SCRATCH_SIZE];
    while !shared.terminated() {
        match device.read(&mut scratch) {
            // VTIME expiry with no data reads zero bytes.
            Ok(0) => {}
            Ok(n) => {
                let mut ring = shared.ring.lock();
                ring.copy_from(&scratch[..n]);
                while ring.is_full() && !shared.terminated() {
                    shared.not_full.wait_for(&mut ring, ERROR_BACKOFF);
                }
            }
            Err(e) => {
                warn!("serial {}: read failed: {}", shared.device.display(), e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

struct SerialSource {
    cfg: SerialConfig,
    shared: Arc<SerialShared>,
    worker: Option<JoinHandle<()>>,
}

impl ByteSource for SerialSource {
    fn init(&mut self) -> Result<()> {
        let device = open_device(&self.cfg)?;
        *self.shared.writer.lock() = Some(device.try_clone()?);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("serial-worker".into())
            .spawn(move || worker(shared, device))
            .map_err(|_| GatewayError::ThreadError("serial worker spawn"))?;
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
        *self.shared.writer.lock() = None;
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

struct SerialSink {
    shared: Arc<SerialShared>,
}

impl MessageSink for SerialSink {
    fn route(&mut self, msg: &Message) -> Result<()> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = msg.frame.to_wire(&mut buf);
        let mut guard = self.shared.writer.lock();
        let device = match guard.as_mut() {
            Some(device) => device,
            None => {
                warn!(
                    "serial {}: message {} dropped, device not open",
                    self.shared.device.display(),
                    msg.frame.msgid
                );
                return Ok(());
            }
        };
        device.write_all(&buf[..len])?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

/// Attach a serial endpoint as `source` and `sink`. The device is opened at
/// connect time by the source half's init; an open failure disables both
/// directions (the sink finds no writer and drops).
pub fn hook_serial(
    pipeline: &mut Pipeline,
    cfg: SerialConfig,
    source: SourceId,
    sink: SinkId,
) -> Result<()> {
    baud_rate(cfg.baud)?;
    let shared = Arc::new(SerialShared {
        device: cfg.device.clone(),
        ring: Mutex::new(RingBuffer::new(RING_CAPACITY)),
        not_full: Condvar::new(),
        writer: Mutex::new(None),
        terminate: AtomicBool::new(false),
    });
    pipeline.attach_source(
        source,
        Box::new(SerialSource {
            cfg,
            shared: Arc::clone(&shared),
            worker: None,
        }),
    );
    pipeline.attach_sink(sink, Box::new(SerialSink { shared }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_rates_map_to_termios_constants() {
        assert!(baud_rate(115200).is_ok());
        assert!(baud_rate(57600).is_ok());
        assert!(matches!(
            baud_rate(12345),
            Err(GatewayError::InvalidParam(_))
        ));
    }

    /// Init on a missing device fails cleanly and routing drops instead of
    /// erroring.
    #[test]
    fn missing_device_fails_init_and_sink_drops() {
        let mut pipeline = Pipeline::new();
        hook_serial(
            &mut pipeline,
            SerialConfig {
                device: PathBuf::from("/dev/does-not-exist-mavgw"),
                baud: 115200,
            },
            SourceId::Vmc,
            SinkId::Vmc,
        )
        .unwrap();
        pipeline.connect();
        assert!(pipeline.sources().get(SourceId::Vmc).unwrap().failed());
        pipeline.disconnect();
    }
}
