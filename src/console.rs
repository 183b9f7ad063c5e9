//! # Operator Console
//!
//! Single-letter runtime control over the three pipeline flags:
//!
//! | key | action                |
//! |-----|-----------------------|
//! | `e` | enable policy chain   |
//! | `d` | disable policy chain  |
//! | `t` | enable transformers   |
//! | `f` | disable transformers  |
//! | `q` | terminate the gateway |
//!
//! The key map is configuration; the contract is the three flags. The
//! reader thread puts stdin into non-canonical mode with a 100 ms read
//! timeout, so it both reacts promptly and notices termination requested
//! elsewhere. The terminal state is restored on exit. When stdin is not a
//! tty (tests, service deployments) the console is disabled.

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tracing::{info, warn};

use crate::pipeline::ControlFlags;

/// Restores the saved terminal discipline when dropped.
struct RawModeGuard {
    original: Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(std::io::stdin(), SetArg::TCSANOW, &self.original);
    }
}

/// Put stdin into non-canonical mode with a 100 ms byte timeout.
fn enter_raw_mode() -> Option<RawModeGuard> {
    let stdin = std::io::stdin();
    let original = termios::tcgetattr(&stdin).ok()?;
    let mut raw = original.clone();
    raw.local_flags &= !LocalFlags::ICANON;
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;
    if let Err(e) = termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw) {
        warn!("console: failed to configure terminal: {}", e);
        return None;
    }
    Some(RawModeGuard { original })
}

fn handle_key(key: u8, flags: &ControlFlags) {
    match key {
        b'q' => {
            info!("console: terminate requested");
            flags.set_terminated();
        }
        b'e' => {
            flags.set_policy_enabled(true);
            info!("===============================");
            info!("!!! SECURITY POLICY ENABLED !!!");
            info!("===============================");
        }
        b'd' => {
            flags.set_policy_enabled(false);
            info!("================================");
            info!("!!! SECURITY POLICY DISABLED !!!");
            info!("================================");
        }
        b't' => {
            flags.set_transform_enabled(true);
            info!("===========================");
            info!("!!! TRANSFORMER ENABLED !!!");
            info!("===========================");
        }
        b'f' => {
            flags.set_transform_enabled(false);
            info!("============================");
            info!("!!! TRANSFORMER DISABLED !!!");
            info!("============================");
        }
        _ => {}
    }
}

/// Start the console reader. Returns `None` when stdin is not a tty.
pub fn spawn(flags: Arc<ControlFlags>) -> Option<JoinHandle<()>> {
    let guard = match enter_raw_mode() {
        Some(guard) => guard,
        None => {
            info!("console: stdin is not a tty, operator console disabled");
            return None;
        }
    };

    let handle = std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let _guard = guard;
            let mut stdin = std::io::stdin();
            let mut byte = [0u8; 1];
            while !flags.terminated() {
                match stdin.read(&mut byte) {
                    Ok(0) => {}
                    Ok(_) => handle_key(byte[0], &flags),
                    Err(e) => {
                        warn!("console: stdin read failed: {}", e);
                        break;
                    }
                }
            }
        })
        .ok()?;
    Some(handle)
}
