//! Outgoing packet builder.
//!
//! Layout on the wire: `[op: u16 LE][payload...]`, all integers little
//! endian, strings as `[len: u16 LE][bytes]`. Framing and encryption are the
//! transport's job.

use bytes::{BufMut, Bytes, BytesMut};

use crate::template::Point;

/// Opcodes for every notification the field engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SendOp {
    PartyResult = 0x3E,
    GuildResult = 0x41,
    SetField = 0x8D,
    UserEnterField = 0xB3,
    UserLeaveField = 0xB4,
    MobEnterField = 0x11C,
    MobLeaveField = 0x11D,
    NpcEnterField = 0x155,
    NpcLeaveField = 0x156,
    ReactorEnterField = 0x18A,
    ReactorLeaveField = 0x18B,
    ScriptMessage = 0x16B,
}

/// Finished packet. Cloning shares the payload buffer, so broadcasting one
/// packet to many sinks does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPacket {
    pub op: SendOp,
    pub payload: Bytes,
}

impl OutPacket {
    /// Opcode followed by payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u16_le(self.op as u16);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

pub struct PacketWriter {
    op: SendOp,
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new(op: SendOp) -> Self {
        Self { op, buf: BytesMut::with_capacity(32) }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(self, v: bool) -> Self {
        self.u8(v as u8)
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.buf.put_i16_le(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.put_u32_le(v);
        self
    }

    /// Length-prefixed string; anything past `u16::MAX` bytes is cut.
    pub fn str(mut self, s: &str) -> Self {
        let bytes = s.as_bytes();
        let len = bytes.len().min(u16::MAX as usize);
        self.buf.put_u16_le(len as u16);
        self.buf.put_slice(&bytes[..len]);
        self
    }

    pub fn point(self, p: Point) -> Self {
        self.i32(p.x).i32(p.y)
    }

    pub fn build(self) -> OutPacket {
        OutPacket { op: self.op, payload: self.buf.freeze() }
    }
}
