//! # Secure MAVLink Protocol Gateway
//!
//! A security gateway sitting between a trusted flight/mission controller
//! and untrusted legacy or enclave peers. It parses MAVLink frames off
//! multiple concurrent transports, routes each message through a static
//! source→sink table, enforces an ordered chain of security policies, and
//! re-emits the survivors, with optional per-port payload transformation
//! and per-port performance accounting along the way.

pub mod bitmap;
pub mod cli;
pub mod codec;
pub mod console;
pub mod error;
pub mod perf;
pub mod pipeline;
pub mod policy;
pub mod ring;
pub mod transform;
pub mod transport;

pub use bitmap::SinkSet;
pub use codec::{MavFrame, MavParser, ParseStatus};
pub use error::{GatewayError, Result};
pub use pipeline::{ControlFlags, Pipeline, RouteTable};
pub use policy::{PolicyChain, PolicyId};
pub use ring::RingBuffer;
pub use transform::{Port, Transformer};
pub use transport::{ByteSource, Message, MessageSink, SinkId, SourceId};

/// The current version of the gateway.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default flight controller UDP port
    pub const VMC_PORT: u16 = 14551;

    /// Default legacy peer UDP port
    pub const LEGACY_PORT: u16 = 12001;

    /// Default performance summary cadence
    pub const PERF_INTERVAL: Duration = Duration::from_secs(2);

    /// Idle sleep between pump passes that moved no data
    pub const IDLE_BACKOFF: Duration = Duration::from_millis(1);
}
