//! Stdout summary sink.
//!
//! Prints one decoded line per message it receives. Hooked as the DISCARD
//! sink by default, which gives the operator a trace of everything the
//! policy chain refused.

use std::fmt::Write as _;

use tracing::info;

use crate::codec;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::transport::{Message, MessageSink, SinkId, MAX_SINKS};

/// How many payload bytes the summary line shows before eliding.
const DUMP_LIMIT: usize = 16;

struct StdioSink;

impl MessageSink for StdioSink {
    fn route(&mut self, msg: &Message) -> Result<()> {
        let mut sinks = String::new();
        for index in 0..MAX_SINKS {
            if msg.sinks.test(index) {
                let name = SinkId::from_index(index).map(SinkId::name).unwrap_or("?");
                let _ = write!(sinks, "{}({}) ", name, index);
            }
        }

        let mut dump = String::new();
        for byte in msg.frame.payload().iter().take(DUMP_LIMIT) {
            let _ = write!(dump, "{:02x} ", byte);
        }
        if msg.frame.payload().len() > DUMP_LIMIT {
            dump.push_str("..");
        }

        info!(
            ">> message [{} ({}) -> {}] attr {:#x} {} ({}) seq {} len {} {{ {}}}",
            msg.source.name(),
            msg.source.index(),
            sinks.trim_end(),
            msg.attribute,
            codec::message_name(msg.frame.msgid).unwrap_or("UNKNOWN"),
            msg.frame.msgid,
            msg.frame.seq,
            msg.frame.len,
            dump
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Attach the summary printer to a sink slot.
pub fn hook_stdio_sink(pipeline: &mut Pipeline, sink: SinkId) {
    pipeline.attach_sink(sink, Box::new(StdioSink));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Heartbeat;
    use crate::transport::SourceId;

    /// The printer never fails, whatever the message shape.
    #[test]
    fn route_always_succeeds() {
        let mut sink = StdioSink;
        let frame = Heartbeat {
            custom_mode: 0,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        }
        .encode(1, 1, 0);
        let mut msg = Message::new(frame, SourceId::Legacy);
        msg.sinks.set(SinkId::Discard.index());
        msg.attribute = 0x5;
        assert!(sink.route(&msg).is_ok());
    }
}
