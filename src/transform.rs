//! # Payload Transformers
//!
//! A transformer rewrites the payload bytes of a message in place and
//! re-finalizes the frame so the emitted checksum always matches the wire
//! payload. Each adapter has two slots: a source-side transformer applied
//! after parse (decode) and a sink-side transformer applied before route
//! (encode). Both are skipped while `transform_enabled` is off; the flag is
//! sampled per message, so toggling mid-spin takes effect on the next one.

use crate::transport::{Message, SinkId, SourceId};

/// In-place payload transformation. Compiled-in callables only; there is no
/// dynamic loading.
pub type Transformer = fn(&mut Message);

/// Addresses one transformer slot: the source side runs pre-push, the sink
/// side pre-route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Source(SourceId),
    Sink(SinkId),
}

/// Key of the supplied XOR transformer.
pub const XOR_KEY: u8 = 0x58;

/// Symmetric XOR obfuscation; decode and encode share this implementation.
/// Applying it twice restores the original payload and checksum.
pub fn xor_transform(msg: &mut Message) {
    for byte in msg.frame.payload_mut() {
        *byte ^= XOR_KEY;
    }
    msg.frame.finalize();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Heartbeat;

    fn sample() -> Message {
        let frame = Heartbeat {
            custom_mode: 7,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 4,
            mavlink_version: 3,
        }
        .encode(1, 1, 9);
        Message::new(frame, SourceId::Vmc)
    }

    /// Round-trip: applying the XOR transformer twice restores payload and
    /// checksum.
    #[test]
    fn xor_twice_is_identity() {
        let mut msg = sample();
        let original = msg.frame.clone();

        xor_transform(&mut msg);
        assert_ne!(msg.frame.payload(), original.payload());

        xor_transform(&mut msg);
        assert_eq!(msg.frame, original);
    }

    /// A single application leaves a checksum that is valid for the
    /// transformed payload.
    #[test]
    fn xor_refinalizes_checksum() {
        let mut msg = sample();
        xor_transform(&mut msg);
        let mut expected = msg.frame.clone();
        expected.finalize();
        assert_eq!(msg.frame.checksum, expected.checksum);
    }
}
