//! Binary UDP protocol.
//!
//! Every datagram is a fixed 9-byte header followed by a typed payload.
//! All fields are little-endian and byte-packed:
//!
//! ```text
//! header  : magic u16 | version u8 | payload_size u8 | type u8 | session_token u32
//! input   : timestamp u32 | player_id u8 | buttons u8 | move_x i8 | move_y i8        (8)
//! spawn   : net_id u32 | kind u8 | owner u8 | x f32 | y f32 | vx f32 | vy f32
//!           | health u8 | username [u8; 16]                                          (39)
//! update  : net_id u32 | x f32 | y f32 | vx f32 | vy f32 | health u8                 (21)
//! destroy : net_id u32                                                               (4)
//! batch   : count u8 | count * (net_id u32 | x f32 | y f32 | health u8)              (1 + 13n)
//! ping/pong: empty
//! ```
//!
//! Decoding is two-staged: [`validate_packet`] checks the header against the
//! datagram length, then [`Packet::decode`] checks the payload against its
//! message type. Nothing is partially applied on failure.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::components::EntityKind;

pub const PROTOCOL_MAGIC: u16 = 0xABCD;
pub const PROTOCOL_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 9;
pub const PLAYER_INPUT_SIZE: usize = 8;
pub const ENTITY_SPAWN_SIZE: usize = 39;
pub const ENTITY_UPDATE_SIZE: usize = 21;
pub const ENTITY_DESTROY_SIZE: usize = 4;
pub const BATCH_ENTRY_SIZE: usize = 13;
pub const MAX_BATCH_ENTITIES: usize = 10;
pub const USERNAME_LEN: usize = 16;

/// Largest datagram the protocol can produce.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + u8::MAX as usize;

/// UDP message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    PlayerInput = 0x10,
    EntitySpawn = 0x20,
    EntityUpdate = 0x21,
    EntityDestroy = 0x22,
    EntityBatchUpdate = 0x23,
    Ping = 0xF1,
    Pong = 0xF2,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x10 => Some(Self::PlayerInput),
            0x20 => Some(Self::EntitySpawn),
            0x21 => Some(Self::EntityUpdate),
            0x22 => Some(Self::EntityDestroy),
            0x23 => Some(Self::EntityBatchUpdate),
            0xF1 => Some(Self::Ping),
            0xF2 => Some(Self::Pong),
            _ => None,
        }
    }
}

bitflags! {
    /// Input button bitfield.
    ///
    /// Only `SHOOT` and `SPECIAL` drive gameplay; the directional bits mirror
    /// the move axes and are carried through untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u8 {
        const SHOOT = 1 << 0;
        const SPECIAL = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
        const LEFT = 1 << 4;
        const RIGHT = 1 << 5;
    }
}

/// Why a datagram was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },
    #[error("bad magic 0x{0:04x}")]
    BadMagic(u16),
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("declared payload size {declared} but received {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    #[error("{msg_type:?} payload must be {expected} bytes, got {actual}")]
    PayloadLength {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },
    #[error("batch of {0} entities exceeds the limit of {MAX_BATCH_ENTITIES}")]
    BatchTooLarge(usize),
    #[error("unknown entity kind {0}")]
    UnknownEntityKind(u8),
}

/// Fixed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u16,
    pub version: u8,
    pub payload_size: u8,
    pub msg_type: u8,
    pub session_token: u32,
}

impl PacketHeader {
    pub fn new(msg_type: MessageType, payload_size: u8, session_token: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            payload_size,
            msg_type: msg_type as u8,
            session_token,
        }
    }

    /// Reads the raw header fields. The caller guarantees `buf.len() >= HEADER_SIZE`.
    fn read(mut buf: &[u8]) -> Self {
        Self {
            magic: buf.get_u16_le(),
            version: buf.get_u8(),
            payload_size: buf.get_u8(),
            msg_type: buf.get_u8(),
            session_token: buf.get_u32_le(),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_u16_le(self.magic);
        out.put_u8(self.version);
        out.put_u8(self.payload_size);
        out.put_u8(self.msg_type);
        out.put_u32_le(self.session_token);
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }
}

/// Accepts `buf` only if it is at least a header long, carries the right magic
/// and version, and its declared payload size matches the received length.
pub fn validate_packet(buf: &[u8]) -> Result<PacketHeader, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Err(ProtocolError::TooShort { len: buf.len() });
    }
    let header = PacketHeader::read(buf);
    if header.magic != PROTOCOL_MAGIC {
        return Err(ProtocolError::BadMagic(header.magic));
    }
    if header.version != PROTOCOL_VERSION {
        return Err(ProtocolError::BadVersion(header.version));
    }
    let actual = buf.len() - HEADER_SIZE;
    if usize::from(header.payload_size) != actual {
        return Err(ProtocolError::SizeMismatch {
            declared: usize::from(header.payload_size),
            actual,
        });
    }
    Ok(header)
}

/// Client input for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayerInput {
    /// Client clock, milliseconds.
    pub timestamp: u32,
    /// Informational only; the server uses the session's player id.
    pub player_id: u8,
    pub buttons: Buttons,
    pub move_x: i8,
    pub move_y: i8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpawn {
    pub network_id: u32,
    pub kind: EntityKind,
    pub owner_player: u8,
    pub pos_x: f32,
    pub pos_y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub health: u8,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityUpdate {
    pub network_id: u32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub health: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchEntry {
    pub network_id: u32,
    pub pos_x: f32,
    pub pos_y: f32,
    pub health: u8,
}

/// Up to [`MAX_BATCH_ENTITIES`] entity states in one datagram.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityBatch {
    entries: Vec<BatchEntry>,
}

impl EntityBatch {
    pub fn new(entries: Vec<BatchEntry>) -> Result<Self, ProtocolError> {
        if entries.len() > MAX_BATCH_ENTITIES {
            return Err(ProtocolError::BatchTooLarge(entries.len()));
        }
        Ok(Self { entries })
    }

    /// Splits any number of entries into batches of at most [`MAX_BATCH_ENTITIES`].
    pub fn chunked(entries: &[BatchEntry]) -> impl Iterator<Item = EntityBatch> + '_ {
        entries.chunks(MAX_BATCH_ENTITIES).map(|chunk| EntityBatch {
            entries: chunk.to_vec(),
        })
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed payload, one variant per message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    PlayerInput(PlayerInput),
    EntitySpawn(EntitySpawn),
    EntityUpdate(EntityUpdate),
    EntityDestroy { network_id: u32 },
    EntityBatchUpdate(EntityBatch),
    Ping,
    Pong,
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::PlayerInput(_) => MessageType::PlayerInput,
            Payload::EntitySpawn(_) => MessageType::EntitySpawn,
            Payload::EntityUpdate(_) => MessageType::EntityUpdate,
            Payload::EntityDestroy { .. } => MessageType::EntityDestroy,
            Payload::EntityBatchUpdate(_) => MessageType::EntityBatchUpdate,
            Payload::Ping => MessageType::Ping,
            Payload::Pong => MessageType::Pong,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Payload::PlayerInput(_) => PLAYER_INPUT_SIZE,
            Payload::EntitySpawn(_) => ENTITY_SPAWN_SIZE,
            Payload::EntityUpdate(_) => ENTITY_UPDATE_SIZE,
            Payload::EntityDestroy { .. } => ENTITY_DESTROY_SIZE,
            Payload::EntityBatchUpdate(batch) => 1 + batch.len() * BATCH_ENTRY_SIZE,
            Payload::Ping | Payload::Pong => 0,
        }
    }

    fn write(&self, out: &mut BytesMut) {
        match self {
            Payload::PlayerInput(input) => {
                out.put_u32_le(input.timestamp);
                out.put_u8(input.player_id);
                out.put_u8(input.buttons.bits());
                out.put_i8(input.move_x);
                out.put_i8(input.move_y);
            }
            Payload::EntitySpawn(spawn) => {
                out.put_u32_le(spawn.network_id);
                out.put_u8(spawn.kind.as_u8());
                out.put_u8(spawn.owner_player);
                out.put_f32_le(spawn.pos_x);
                out.put_f32_le(spawn.pos_y);
                out.put_f32_le(spawn.vel_x);
                out.put_f32_le(spawn.vel_y);
                out.put_u8(spawn.health);
                out.put_slice(&encode_username(&spawn.username));
            }
            Payload::EntityUpdate(update) => {
                out.put_u32_le(update.network_id);
                out.put_f32_le(update.pos_x);
                out.put_f32_le(update.pos_y);
                out.put_f32_le(update.vel_x);
                out.put_f32_le(update.vel_y);
                out.put_u8(update.health);
            }
            Payload::EntityDestroy { network_id } => out.put_u32_le(*network_id),
            Payload::EntityBatchUpdate(batch) => {
                out.put_u8(batch.len() as u8);
                for entry in batch.entries() {
                    out.put_u32_le(entry.network_id);
                    out.put_f32_le(entry.pos_x);
                    out.put_f32_le(entry.pos_y);
                    out.put_u8(entry.health);
                }
            }
            Payload::Ping | Payload::Pong => {}
        }
    }

    fn read(msg_type: MessageType, mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let actual = buf.len();
        let expect = move |expected: usize| {
            if actual == expected {
                Ok(())
            } else {
                Err(ProtocolError::PayloadLength {
                    msg_type,
                    expected,
                    actual,
                })
            }
        };

        let payload = match msg_type {
            MessageType::PlayerInput => {
                expect(PLAYER_INPUT_SIZE)?;
                Payload::PlayerInput(PlayerInput {
                    timestamp: buf.get_u32_le(),
                    player_id: buf.get_u8(),
                    buttons: Buttons::from_bits_retain(buf.get_u8()),
                    move_x: buf.get_i8(),
                    move_y: buf.get_i8(),
                })
            }
            MessageType::EntitySpawn => {
                expect(ENTITY_SPAWN_SIZE)?;
                let network_id = buf.get_u32_le();
                let raw_kind = buf.get_u8();
                let kind = EntityKind::from_u8(raw_kind)
                    .ok_or(ProtocolError::UnknownEntityKind(raw_kind))?;
                let owner_player = buf.get_u8();
                let pos_x = buf.get_f32_le();
                let pos_y = buf.get_f32_le();
                let vel_x = buf.get_f32_le();
                let vel_y = buf.get_f32_le();
                let health = buf.get_u8();
                let mut name = [0u8; USERNAME_LEN];
                buf.copy_to_slice(&mut name);
                Payload::EntitySpawn(EntitySpawn {
                    network_id,
                    kind,
                    owner_player,
                    pos_x,
                    pos_y,
                    vel_x,
                    vel_y,
                    health,
                    username: decode_username(&name),
                })
            }
            MessageType::EntityUpdate => {
                expect(ENTITY_UPDATE_SIZE)?;
                Payload::EntityUpdate(EntityUpdate {
                    network_id: buf.get_u32_le(),
                    pos_x: buf.get_f32_le(),
                    pos_y: buf.get_f32_le(),
                    vel_x: buf.get_f32_le(),
                    vel_y: buf.get_f32_le(),
                    health: buf.get_u8(),
                })
            }
            MessageType::EntityDestroy => {
                expect(ENTITY_DESTROY_SIZE)?;
                Payload::EntityDestroy {
                    network_id: buf.get_u32_le(),
                }
            }
            MessageType::EntityBatchUpdate => {
                let Some(&count) = buf.first() else {
                    return Err(ProtocolError::PayloadLength {
                        msg_type,
                        expected: 1,
                        actual: 0,
                    });
                };
                let count = usize::from(count);
                if count > MAX_BATCH_ENTITIES {
                    return Err(ProtocolError::BatchTooLarge(count));
                }
                expect(1 + count * BATCH_ENTRY_SIZE)?;
                buf.advance(1);
                let entries = (0..count)
                    .map(|_| BatchEntry {
                        network_id: buf.get_u32_le(),
                        pos_x: buf.get_f32_le(),
                        pos_y: buf.get_f32_le(),
                        health: buf.get_u8(),
                    })
                    .collect();
                Payload::EntityBatchUpdate(EntityBatch { entries })
            }
            MessageType::Ping => {
                expect(0)?;
                Payload::Ping
            }
            MessageType::Pong => {
                expect(0)?;
                Payload::Pong
            }
        };
        Ok(payload)
    }
}

/// A fully decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub session_token: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn new(session_token: u32, payload: Payload) -> Self {
        Self {
            session_token,
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let len = self.payload.encoded_len();
        let mut out = BytesMut::with_capacity(HEADER_SIZE + len);
        // Every payload variant is bounded well below 256 bytes.
        PacketHeader::new(self.payload.message_type(), len as u8, self.session_token)
            .write(&mut out);
        self.payload.write(&mut out);
        out.freeze()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = validate_packet(buf)?;
        let msg_type = header
            .message_type()
            .ok_or(ProtocolError::UnknownType(header.msg_type))?;
        let payload = Payload::read(msg_type, &buf[HEADER_SIZE..])?;
        Ok(Self {
            session_token: header.session_token,
            payload,
        })
    }
}

/// NUL-padded fixed-width name; at most `USERNAME_LEN - 1` bytes survive so the
/// field always stays NUL-terminated. Truncation respects UTF-8 boundaries.
pub fn encode_username(name: &str) -> [u8; USERNAME_LEN] {
    let mut out = [0u8; USERNAME_LEN];
    let mut end = name.len().min(USERNAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    out[..end].copy_from_slice(&name.as_bytes()[..end]);
    out
}

pub fn decode_username(raw: &[u8; USERNAME_LEN]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(USERNAME_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(magic: u16, version: u8, payload_size: u8, msg_type: u8) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&magic.to_le_bytes());
        v.push(version);
        v.push(payload_size);
        v.push(msg_type);
        v.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        v
    }

    #[test]
    fn header_layout_is_little_endian_and_packed() {
        let bytes = Packet::new(0xDEAD_BEEF, Payload::Ping).encode();
        assert_eq!(&bytes[..], &[0xCD, 0xAB, 1, 0, 0xF1, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn payload_sizes_match_the_wire_layout() {
        let spawn = Packet::new(
            0,
            Payload::EntitySpawn(EntitySpawn {
                network_id: 1,
                kind: EntityKind::Player,
                owner_player: 1,
                pos_x: 0.0,
                pos_y: 0.0,
                vel_x: 0.0,
                vel_y: 0.0,
                health: 100,
                username: "pilot".into(),
            }),
        );
        assert_eq!(spawn.encode().len(), HEADER_SIZE + 39);

        let input = Packet::new(7, Payload::PlayerInput(PlayerInput::default()));
        assert_eq!(input.encode().len(), HEADER_SIZE + 8);

        let destroy = Packet::new(0, Payload::EntityDestroy { network_id: 9 });
        assert_eq!(destroy.encode().len(), HEADER_SIZE + 4);
    }

    #[test]
    fn batch_roundtrip_preserves_entry_sequence() {
        for n in 0..=MAX_BATCH_ENTITIES {
            let entries: Vec<BatchEntry> = (0..n)
                .map(|i| BatchEntry {
                    network_id: 100 + i as u32,
                    pos_x: i as f32 * 1.5,
                    pos_y: -(i as f32),
                    health: (i * 10) as u8,
                })
                .collect();
            let batch = EntityBatch::new(entries.clone()).unwrap();
            let bytes = Packet::new(0, Payload::EntityBatchUpdate(batch)).encode();
            assert_eq!(bytes.len(), HEADER_SIZE + 1 + n * BATCH_ENTRY_SIZE);

            match Packet::decode(&bytes).unwrap().payload {
                Payload::EntityBatchUpdate(back) => assert_eq!(back.entries(), &entries[..]),
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[test]
    fn batch_rejects_more_than_ten_entries() {
        let entries = vec![
            BatchEntry {
                network_id: 1,
                pos_x: 0.0,
                pos_y: 0.0,
                health: 1,
            };
            11
        ];
        assert_eq!(
            EntityBatch::new(entries.clone()),
            Err(ProtocolError::BatchTooLarge(11))
        );
        let chunks: Vec<usize> = EntityBatch::chunked(&entries).map(|b| b.len()).collect();
        assert_eq!(chunks, vec![10, 1]);

        let mut raw = raw_header(PROTOCOL_MAGIC, PROTOCOL_VERSION, 1, 0x23);
        raw.push(11);
        assert_eq!(Packet::decode(&raw), Err(ProtocolError::BatchTooLarge(11)));
    }

    #[test]
    fn validate_rejects_size_mismatch_for_every_length() {
        for actual_payload in 0..=64usize {
            for declared in [0u8, 1, 8, 13, 39, 255] {
                let mut raw = raw_header(PROTOCOL_MAGIC, PROTOCOL_VERSION, declared, 0x10);
                raw.resize(HEADER_SIZE + actual_payload, 0);
                let result = validate_packet(&raw);
                if usize::from(declared) == actual_payload {
                    assert!(result.is_ok());
                } else {
                    assert_eq!(
                        result,
                        Err(ProtocolError::SizeMismatch {
                            declared: usize::from(declared),
                            actual: actual_payload,
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn validate_rejects_short_bad_magic_and_version() {
        for len in 0..HEADER_SIZE {
            assert_eq!(
                validate_packet(&vec![0u8; len]),
                Err(ProtocolError::TooShort { len })
            );
        }
        let raw = raw_header(0xABCE, PROTOCOL_VERSION, 0, 0xF1);
        assert_eq!(validate_packet(&raw), Err(ProtocolError::BadMagic(0xABCE)));
        let raw = raw_header(PROTOCOL_MAGIC, 2, 0, 0xF1);
        assert_eq!(validate_packet(&raw), Err(ProtocolError::BadVersion(2)));
    }

    #[test]
    fn decode_rejects_wrong_payload_length_for_type() {
        let mut raw = raw_header(PROTOCOL_MAGIC, PROTOCOL_VERSION, 7, 0x10);
        raw.resize(HEADER_SIZE + 7, 0);
        assert!(matches!(
            Packet::decode(&raw),
            Err(ProtocolError::PayloadLength {
                msg_type: MessageType::PlayerInput,
                expected: 8,
                actual: 7
            })
        ));

        let raw = raw_header(PROTOCOL_MAGIC, PROTOCOL_VERSION, 0, 0x99);
        assert_eq!(Packet::decode(&raw), Err(ProtocolError::UnknownType(0x99)));
    }

    #[test]
    fn input_keeps_reserved_button_bits() {
        let input = PlayerInput {
            timestamp: 42,
            player_id: 3,
            buttons: Buttons::SHOOT | Buttons::RIGHT,
            move_x: 1,
            move_y: -1,
        };
        let bytes = Packet::new(5, Payload::PlayerInput(input)).encode();
        let back = Packet::decode(&bytes).unwrap();
        assert_eq!(back.session_token, 5);
        assert_eq!(back.payload, Payload::PlayerInput(input));
    }

    #[test]
    fn username_is_truncated_and_nul_terminated() {
        let raw = encode_username("a_very_long_pilot_name");
        assert_eq!(raw[USERNAME_LEN - 1], 0);
        assert_eq!(decode_username(&raw), "a_very_long_pil");

        // Multi-byte char straddling the cut is dropped whole.
        let raw = encode_username("ééééééééé");
        assert_eq!(decode_username(&raw), "ééééééé");
    }
}
