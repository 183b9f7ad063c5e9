//! # MAVLink Framing Codec
//!
//! Byte-level codec for MAVLink v1 (`0xFE`) and v2 (`0xFD`) frames. Each
//! source slot owns one [`MavParser`] (channel id = slot index) and feeds it
//! a byte at a time; the parser writes into the slot's frame in place and
//! reports [`ParseStatus::FrameReady`] when a complete, checksum-valid frame
//! is available. Any malformed input is reported as a recoverable error and
//! the parser re-synchronizes at the next magic byte.
//!
//! Checksums are X.25 CRC-16/MCRF4XX seeded with the per-message CRC-extra
//! byte. Version-2 signatures are consumed and carried through unverified;
//! link signing is not this gateway's concern.
//!
//! The typed payload views at the bottom ([`Heartbeat`], [`CommandLong`],
//! [`ParamSet`]) cover the messages the security policy catalog inspects.

/// Magic byte opening a MAVLink v1 frame.
pub const STX_V1: u8 = 0xFE;
/// Magic byte opening a MAVLink v2 frame.
pub const STX_V2: u8 = 0xFD;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 255;
/// Length of a v2 signature block.
pub const SIGNATURE_LEN: usize = 13;
/// Largest possible wire frame (v2 header + payload + CRC + signature).
pub const MAX_FRAME_LEN: usize = 10 + MAX_PAYLOAD_LEN + 2 + SIGNATURE_LEN;

/// Incompat flag bit marking a signed v2 frame.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Message identifiers for the deployment catalog.
pub const MSG_ID_HEARTBEAT: u32 = 0;
pub const MSG_ID_SYS_STATUS: u32 = 1;
pub const MSG_ID_PARAM_VALUE: u32 = 22;
pub const MSG_ID_PARAM_SET: u32 = 23;
pub const MSG_ID_GPS_RAW_INT: u32 = 24;
pub const MSG_ID_ATTITUDE: u32 = 30;
pub const MSG_ID_MISSION_ITEM: u32 = 39;
pub const MSG_ID_COMMAND_LONG: u32 = 76;
pub const MSG_ID_COMMAND_ACK: u32 = 77;
pub const MSG_ID_MEMINFO: u32 = 152;
pub const MSG_ID_STATUSTEXT: u32 = 253;

/// MAV_CMD values inspected by the policy catalog.
pub const MAV_CMD_NAV_WAYPOINT: u16 = 16;
pub const MAV_CMD_DO_FENCE_ENABLE: u16 = 207;

/// Structural descriptors for the messages this deployment understands:
/// (id, name, CRC-extra). A frame whose id is not listed cannot be
/// checksum-validated and is rejected by the parser.
const MESSAGES: &[(u32, &str, u8)] = &[
    (MSG_ID_HEARTBEAT, "HEARTBEAT", 50),
    (MSG_ID_SYS_STATUS, "SYS_STATUS", 124),
    (MSG_ID_PARAM_VALUE, "PARAM_VALUE", 220),
    (MSG_ID_PARAM_SET, "PARAM_SET", 168),
    (MSG_ID_GPS_RAW_INT, "GPS_RAW_INT", 24),
    (MSG_ID_ATTITUDE, "ATTITUDE", 39),
    (MSG_ID_MISSION_ITEM, "MISSION_ITEM", 254),
    (MSG_ID_COMMAND_LONG, "COMMAND_LONG", 152),
    (MSG_ID_COMMAND_ACK, "COMMAND_ACK", 143),
    (MSG_ID_MEMINFO, "MEMINFO", 208),
    (MSG_ID_STATUSTEXT, "STATUSTEXT", 83),
];

/// CRC-extra byte for a message id, `None` for unknown messages.
pub fn crc_extra(msgid: u32) -> Option<u8> {
    MESSAGES.iter().find(|m| m.0 == msgid).map(|m| m.2)
}

/// Human-readable message name for the console printer.
pub fn message_name(msgid: u32) -> Option<&'static str> {
    MESSAGES.iter().find(|m| m.0 == msgid).map(|m| m.1)
}

/// X.25 CRC-16/MCRF4XX accumulate step.
fn crc_accumulate(byte: u8, crc: &mut u16) {
    let mut tmp = byte ^ (*crc & 0xff) as u8;
    tmp ^= tmp << 4;
    *crc = (*crc >> 8) ^ ((tmp as u16) << 8) ^ ((tmp as u16) << 3) ^ ((tmp as u16) >> 4);
}

const CRC_INIT: u16 = 0xffff;

/// One complete protocol frame: header fields, payload, checksum and, for
/// signed v2 traffic, the carried signature block.
#[derive(Debug, Clone)]
pub struct MavFrame {
    pub magic: u8,
    pub len: u8,
    pub incompat_flags: u8,
    pub compat_flags: u8,
    pub seq: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub msgid: u32,
    payload: [u8; MAX_PAYLOAD_LEN],
    pub checksum: u16,
    signature: [u8; SIGNATURE_LEN],
}

impl Default for MavFrame {
    fn default() -> Self {
        Self {
            magic: STX_V1,
            len: 0,
            incompat_flags: 0,
            compat_flags: 0,
            seq: 0,
            system_id: 0,
            component_id: 0,
            msgid: 0,
            payload: [0; MAX_PAYLOAD_LEN],
            checksum: 0,
            signature: [0; SIGNATURE_LEN],
        }
    }
}

impl PartialEq for MavFrame {
    fn eq(&self, other: &Self) -> bool {
        self.magic == other.magic
            && self.len == other.len
            && self.incompat_flags == other.incompat_flags
            && self.compat_flags == other.compat_flags
            && self.seq == other.seq
            && self.system_id == other.system_id
            && self.component_id == other.component_id
            && self.msgid == other.msgid
            && self.payload() == other.payload()
            && self.checksum == other.checksum
    }
}

impl MavFrame {
    /// Build a v1 frame with a computed checksum. `msgid` must fit the v1
    /// single-byte id space and the payload the protocol maximum.
    pub fn new_v1(system_id: u8, component_id: u8, seq: u8, msgid: u32, payload: &[u8]) -> Self {
        assert!(msgid <= 0xff, "msgid {} does not fit a v1 frame", msgid);
        assert!(payload.len() <= MAX_PAYLOAD_LEN);
        let mut frame = Self {
            magic: STX_V1,
            len: payload.len() as u8,
            seq,
            system_id,
            component_id,
            msgid,
            ..Self::default()
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        frame.finalize();
        frame
    }

    /// Build a v2 frame with a computed checksum. Trailing payload zeros are
    /// truncated on the wire as the protocol requires (at least one byte is
    /// always kept).
    pub fn new_v2(system_id: u8, component_id: u8, seq: u8, msgid: u32, payload: &[u8]) -> Self {
        assert!(payload.len() <= MAX_PAYLOAD_LEN);
        let mut trimmed = payload.len();
        while trimmed > 1 && payload[trimmed - 1] == 0 {
            trimmed -= 1;
        }
        let mut frame = Self {
            magic: STX_V2,
            len: trimmed as u8,
            seq,
            system_id,
            component_id,
            msgid,
            ..Self::default()
        };
        frame.payload[..trimmed].copy_from_slice(&payload[..trimmed]);
        frame.finalize();
        frame
    }

    /// Wire payload (length `len`). Fields past the wire length read as zero
    /// through [`padded_payload`](Self::padded_payload).
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    /// Mutable view of the wire payload, for in-place transformers.
    /// Call [`finalize`](Self::finalize) after mutating.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload[..self.len as usize]
    }

    /// Full zero-extended payload buffer, for fixed-offset field reads.
    pub fn padded_payload(&self) -> &[u8; MAX_PAYLOAD_LEN] {
        &self.payload
    }

    pub fn is_v2(&self) -> bool {
        self.magic == STX_V2
    }

    pub fn is_signed(&self) -> bool {
        self.is_v2() && self.incompat_flags & INCOMPAT_FLAG_SIGNED != 0
    }

    fn header_len(&self) -> usize {
        if self.is_v2() {
            10
        } else {
            6
        }
    }

    /// Total on-wire byte count: payload length plus the version-dependent
    /// header/trailer overhead.
    pub fn wire_len(&self) -> usize {
        let sig = if self.is_signed() { SIGNATURE_LEN } else { 0 };
        self.header_len() + self.len as usize + 2 + sig
    }

    /// Recompute the checksum after in-place payload mutation. Unknown
    /// message ids fold a zero CRC-extra, matching what the parser would
    /// reject; transformers only run on frames that already parsed.
    pub fn finalize(&mut self) {
        let mut crc = CRC_INIT;
        crc_accumulate(self.len, &mut crc);
        if self.is_v2() {
            crc_accumulate(self.incompat_flags, &mut crc);
            crc_accumulate(self.compat_flags, &mut crc);
        }
        crc_accumulate(self.seq, &mut crc);
        crc_accumulate(self.system_id, &mut crc);
        crc_accumulate(self.component_id, &mut crc);
        if self.is_v2() {
            crc_accumulate(self.msgid as u8, &mut crc);
            crc_accumulate((self.msgid >> 8) as u8, &mut crc);
            crc_accumulate((self.msgid >> 16) as u8, &mut crc);
        } else {
            crc_accumulate(self.msgid as u8, &mut crc);
        }
        for i in 0..self.len as usize {
            crc_accumulate(self.payload[i], &mut crc);
        }
        crc_accumulate(crc_extra(self.msgid).unwrap_or(0), &mut crc);
        self.checksum = crc;
    }

    /// Serialize into a send buffer, returning the byte count. The buffer
    /// must hold at least [`wire_len`](Self::wire_len) bytes.
    pub fn to_wire(&self, out: &mut [u8]) -> usize {
        let total = self.wire_len();
        assert!(out.len() >= total, "send buffer too small for frame");
        let mut n = 0;
        out[n] = self.magic;
        n += 1;
        out[n] = self.len;
        n += 1;
        if self.is_v2() {
            out[n] = self.incompat_flags;
            out[n + 1] = self.compat_flags;
            n += 2;
        }
        out[n] = self.seq;
        out[n + 1] = self.system_id;
        out[n + 2] = self.component_id;
        n += 3;
        if self.is_v2() {
            out[n] = self.msgid as u8;
            out[n + 1] = (self.msgid >> 8) as u8;
            out[n + 2] = (self.msgid >> 16) as u8;
            n += 3;
        } else {
            out[n] = self.msgid as u8;
            n += 1;
        }
        out[n..n + self.len as usize].copy_from_slice(self.payload());
        n += self.len as usize;
        out[n] = self.checksum as u8;
        out[n + 1] = (self.checksum >> 8) as u8;
        n += 2;
        if self.is_signed() {
            out[n..n + SIGNATURE_LEN].copy_from_slice(&self.signature);
            n += SIGNATURE_LEN;
        }
        debug_assert_eq!(n, total);
        n
    }

    /// Convenience serializer for tests and in-process transports.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = self.to_wire(&mut buf);
        buf[..n].to_vec()
    }
}

/// Outcome of feeding one byte to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The byte was consumed; the frame is not complete yet.
    NeedMore,
    /// A complete, checksum-valid frame is ready in the caller's slot.
    FrameReady,
    /// The byte stream is malformed; the parser has reset and will
    /// re-synchronize at the next magic byte.
    Error(ParseError),
}

/// Recoverable parse faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A byte outside any frame that is not a magic byte.
    UnexpectedByte(u8),
    /// Frame completed but its checksum did not match.
    BadCrc { msgid: u32 },
    /// Frame carried a message id with no structural descriptor, so its
    /// checksum cannot be validated.
    UnknownMessage(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Len,
    IncompatFlags,
    CompatFlags,
    Seq,
    SystemId,
    ComponentId,
    MsgId { index: u8 },
    Payload { index: usize },
    CrcLow,
    CrcHigh,
    Signature { index: usize },
}

/// Incremental per-channel frame parser. One instance per source slot; the
/// channel number is carried for diagnostics only.
#[derive(Debug)]
pub struct MavParser {
    chan: u8,
    state: State,
    crc: u16,
    crc_low: u8,
}

impl MavParser {
    pub fn new(chan: u8) -> Self {
        Self {
            chan,
            state: State::Idle,
            crc: CRC_INIT,
            crc_low: 0,
        }
    }

    pub fn chan(&self) -> u8 {
        self.chan
    }

    /// Feed one byte, assembling into `frame` in place.
    pub fn parse_byte(&mut self, byte: u8, frame: &mut MavFrame) -> ParseStatus {
        match self.state {
            State::Idle => {
                if byte == STX_V1 || byte == STX_V2 {
                    *frame = MavFrame {
                        magic: byte,
                        ..MavFrame::default()
                    };
                    self.crc = CRC_INIT;
                    self.state = State::Len;
                    ParseStatus::NeedMore
                } else {
                    ParseStatus::Error(ParseError::UnexpectedByte(byte))
                }
            }
            State::Len => {
                frame.len = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = if frame.is_v2() {
                    State::IncompatFlags
                } else {
                    State::Seq
                };
                ParseStatus::NeedMore
            }
            State::IncompatFlags => {
                frame.incompat_flags = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = State::CompatFlags;
                ParseStatus::NeedMore
            }
            State::CompatFlags => {
                frame.compat_flags = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = State::Seq;
                ParseStatus::NeedMore
            }
            State::Seq => {
                frame.seq = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = State::SystemId;
                ParseStatus::NeedMore
            }
            State::SystemId => {
                frame.system_id = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = State::ComponentId;
                ParseStatus::NeedMore
            }
            State::ComponentId => {
                frame.component_id = byte;
                crc_accumulate(byte, &mut self.crc);
                self.state = State::MsgId { index: 0 };
                ParseStatus::NeedMore
            }
            State::MsgId { index } => {
                frame.msgid |= (byte as u32) << (8 * index);
                crc_accumulate(byte, &mut self.crc);
                let id_bytes = if frame.is_v2() { 3 } else { 1 };
                if index + 1 < id_bytes {
                    self.state = State::MsgId { index: index + 1 };
                } else if frame.len == 0 {
                    self.state = State::CrcLow;
                } else {
                    self.state = State::Payload { index: 0 };
                }
                ParseStatus::NeedMore
            }
            State::Payload { index } => {
                frame.payload[index] = byte;
                crc_accumulate(byte, &mut self.crc);
                if index + 1 < frame.len as usize {
                    self.state = State::Payload { index: index + 1 };
                } else {
                    self.state = State::CrcLow;
                }
                ParseStatus::NeedMore
            }
            State::CrcLow => {
                self.crc_low = byte;
                self.state = State::CrcHigh;
                ParseStatus::NeedMore
            }
            State::CrcHigh => {
                self.state = State::Idle;
                let extra = match crc_extra(frame.msgid) {
                    Some(extra) => extra,
                    None => {
                        return ParseStatus::Error(ParseError::UnknownMessage(frame.msgid));
                    }
                };
                crc_accumulate(extra, &mut self.crc);
                let received = (byte as u16) << 8 | self.crc_low as u16;
                if received != self.crc {
                    return ParseStatus::Error(ParseError::BadCrc { msgid: frame.msgid });
                }
                frame.checksum = received;
                if frame.is_signed() {
                    self.state = State::Signature { index: 0 };
                    ParseStatus::NeedMore
                } else {
                    ParseStatus::FrameReady
                }
            }
            State::Signature { index } => {
                frame.signature[index] = byte;
                if index + 1 < SIGNATURE_LEN {
                    self.state = State::Signature { index: index + 1 };
                    ParseStatus::NeedMore
                } else {
                    self.state = State::Idle;
                    ParseStatus::FrameReady
                }
            }
        }
    }
}

fn read_u16(payload: &[u8; MAX_PAYLOAD_LEN], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

fn read_u32(payload: &[u8; MAX_PAYLOAD_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

fn read_f32(payload: &[u8; MAX_PAYLOAD_LEN], offset: usize) -> f32 {
    f32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

/// HEARTBEAT payload view (9 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    pub fn decode(frame: &MavFrame) -> Option<Self> {
        if frame.msgid != MSG_ID_HEARTBEAT {
            return None;
        }
        let p = frame.padded_payload();
        Some(Self {
            custom_mode: read_u32(p, 0),
            mav_type: p[4],
            autopilot: p[5],
            base_mode: p[6],
            system_status: p[7],
            mavlink_version: p[8],
        })
    }

    pub fn encode(&self, system_id: u8, component_id: u8, seq: u8) -> MavFrame {
        let mut payload = [0u8; 9];
        payload[0..4].copy_from_slice(&self.custom_mode.to_le_bytes());
        payload[4] = self.mav_type;
        payload[5] = self.autopilot;
        payload[6] = self.base_mode;
        payload[7] = self.system_status;
        payload[8] = self.mavlink_version;
        MavFrame::new_v1(system_id, component_id, seq, MSG_ID_HEARTBEAT, &payload)
    }
}

/// COMMAND_LONG payload view (33 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLong {
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub param5: f32,
    pub param6: f32,
    pub param7: f32,
    pub command: u16,
    pub target_system: u8,
    pub target_component: u8,
    pub confirmation: u8,
}

impl CommandLong {
    pub fn decode(frame: &MavFrame) -> Option<Self> {
        if frame.msgid != MSG_ID_COMMAND_LONG {
            return None;
        }
        let p = frame.padded_payload();
        Some(Self {
            param1: read_f32(p, 0),
            param2: read_f32(p, 4),
            param3: read_f32(p, 8),
            param4: read_f32(p, 12),
            param5: read_f32(p, 16),
            param6: read_f32(p, 20),
            param7: read_f32(p, 24),
            command: read_u16(p, 28),
            target_system: p[30],
            target_component: p[31],
            confirmation: p[32],
        })
    }

    pub fn encode(&self, system_id: u8, component_id: u8, seq: u8) -> MavFrame {
        let mut payload = [0u8; 33];
        for (i, param) in [
            self.param1,
            self.param2,
            self.param3,
            self.param4,
            self.param5,
            self.param6,
            self.param7,
        ]
        .iter()
        .enumerate()
        {
            payload[i * 4..i * 4 + 4].copy_from_slice(&param.to_le_bytes());
        }
        payload[28..30].copy_from_slice(&self.command.to_le_bytes());
        payload[30] = self.target_system;
        payload[31] = self.target_component;
        payload[32] = self.confirmation;
        MavFrame::new_v1(system_id, component_id, seq, MSG_ID_COMMAND_LONG, &payload)
    }
}

/// PARAM_SET payload view (23 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSet {
    pub param_value: f32,
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: [u8; 16],
    pub param_type: u8,
}

impl ParamSet {
    pub fn decode(frame: &MavFrame) -> Option<Self> {
        if frame.msgid != MSG_ID_PARAM_SET {
            return None;
        }
        let p = frame.padded_payload();
        let mut param_id = [0u8; 16];
        param_id.copy_from_slice(&p[6..22]);
        Some(Self {
            param_value: read_f32(p, 0),
            target_system: p[4],
            target_component: p[5],
            param_id,
            param_type: p[22],
        })
    }

    /// Parameter name up to the first NUL, as the protocol defines it.
    pub fn param_id_str(&self) -> &str {
        let end = self
            .param_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.param_id.len());
        std::str::from_utf8(&self.param_id[..end]).unwrap_or("")
    }

    pub fn encode(&self, system_id: u8, component_id: u8, seq: u8) -> MavFrame {
        let mut payload = [0u8; 23];
        payload[0..4].copy_from_slice(&self.param_value.to_le_bytes());
        payload[4] = self.target_system;
        payload[5] = self.target_component;
        payload[6..22].copy_from_slice(&self.param_id);
        payload[22] = self.param_type;
        MavFrame::new_v1(system_id, component_id, seq, MSG_ID_PARAM_SET, &payload)
    }
}

/// Build a PARAM_SET name field from a string, NUL-padded to 16 bytes.
pub fn param_id(name: &str) -> [u8; 16] {
    assert!(name.len() <= 16, "param id too long");
    let mut id = [0u8; 16];
    id[..name.len()].copy_from_slice(name.as_bytes());
    id
}
