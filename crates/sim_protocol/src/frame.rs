use std::io::{self, Read, Write};

use crate::opcode::OpCode;
use crate::ProtocolError;

/// Largest payload accepted from the wire.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Errors produced while splitting a payload into fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TruncatedHeader,
    TruncatedValue,
}

/// A raw framed message: operation code plus field payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub op: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Creates an empty packet for `op`.
    pub fn new(op: OpCode) -> Self {
        Self {
            op: u32::from(op),
            payload: Vec::new(),
        }
    }

    /// Returns the decoded operation code.
    pub fn op_code(&self) -> Result<OpCode, ProtocolError> {
        OpCode::try_from(self.op)
    }

    /// Appends a `u32` field.
    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        write_field(&mut self.payload, &value.to_le_bytes());
        self
    }

    /// Appends a `u64` field.
    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        write_field(&mut self.payload, &value.to_le_bytes());
        self
    }

    /// Appends a NUL-terminated string field.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        write_field(&mut self.payload, &bytes);
        self
    }

    /// Appends a raw byte field.
    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        write_field(&mut self.payload, value);
        self
    }

    /// Returns a reader over the payload fields.
    pub fn fields(&self) -> FieldReader<'_> {
        FieldReader::new(&self.payload)
    }
}

/// Reads length-prefixed fields from a payload.
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    /// Creates a new reader starting at offset zero.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Returns the next field, or None if fully consumed.
    pub fn next(&mut self) -> Result<Option<&'a [u8]>, FrameError> {
        if self.offset == self.bytes.len() {
            return Ok(None);
        }
        if self.bytes.len() - self.offset < 4 {
            return Err(FrameError::TruncatedHeader);
        }
        let len = u32::from_le_bytes([
            self.bytes[self.offset],
            self.bytes[self.offset + 1],
            self.bytes[self.offset + 2],
            self.bytes[self.offset + 3],
        ]) as usize;
        self.offset += 4;
        if len > self.bytes.len() - self.offset {
            return Err(FrameError::TruncatedValue);
        }
        let value = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(Some(value))
    }

    /// Returns true when every field has been read.
    pub fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }

    /// Reads a required raw field.
    pub fn bytes(&mut self, name: &'static str) -> Result<&'a [u8], ProtocolError> {
        self.next()?.ok_or(ProtocolError::MissingField(name))
    }

    /// Reads a required `u32` field.
    pub fn u32(&mut self, name: &'static str) -> Result<u32, ProtocolError> {
        let value = self.bytes(name)?;
        let bytes: [u8; 4] = value
            .try_into()
            .map_err(|_| ProtocolError::InvalidLength(name))?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads a required `u64` field.
    pub fn u64(&mut self, name: &'static str) -> Result<u64, ProtocolError> {
        let value = self.bytes(name)?;
        let bytes: [u8; 8] = value
            .try_into()
            .map_err(|_| ProtocolError::InvalidLength(name))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Reads a required string field, dropping the NUL terminator.
    pub fn string(&mut self, name: &'static str) -> Result<String, ProtocolError> {
        let value = self.bytes(name)?;
        let trimmed = match value.iter().position(|byte| *byte == 0) {
            Some(end) => &value[..end],
            None => value,
        };
        String::from_utf8(trimmed.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Appends a length-prefixed field to the output buffer.
pub fn write_field(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
}

/// Reads one packet. Returns `Ok(None)` when the peer closed the stream
/// before the first header byte.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Packet>, ProtocolError> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::Io(io::ErrorKind::UnexpectedEof)),
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let op = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if size > MAX_PAYLOAD {
        return Err(ProtocolError::InvalidLength("payload"));
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;
    Ok(Some(Packet { op, payload }))
}

/// Writes one packet as a single buffer.
pub fn write_packet<W: Write>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError> {
    let mut buf = Vec::with_capacity(8 + packet.payload.len());
    buf.extend_from_slice(&packet.op.to_le_bytes());
    buf.extend_from_slice(&(packet.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&packet.payload);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_returns_none_for_empty() {
        let mut reader = FieldReader::new(&[]);
        assert_eq!(reader.next(), Ok(None));
        assert!(reader.is_empty());
    }

    #[test]
    fn reader_rejects_truncated_header() {
        let mut reader = FieldReader::new(&[0x01, 0x00, 0x00]);
        assert_eq!(reader.next(), Err(FrameError::TruncatedHeader));
    }

    #[test]
    fn reader_rejects_truncated_value() {
        let bytes = [0x04, 0x00, 0x00, 0x00, 0xAA];
        let mut reader = FieldReader::new(&bytes);
        assert_eq!(reader.next(), Err(FrameError::TruncatedValue));
    }

    #[test]
    fn string_fields_carry_terminator_on_the_wire() {
        let mut packet = Packet::new(OpCode::IoHandshake);
        packet.push_str("DISCO");
        assert_eq!(packet.payload.len(), 4 + 6);
        assert_eq!(&packet.payload[..4], &6u32.to_le_bytes());
        assert_eq!(packet.payload[9], 0);
        assert_eq!(packet.fields().string("device"), Ok("DISCO".to_string()));
    }

    #[test]
    fn typed_readers_validate_width() {
        let mut packet = Packet::new(OpCode::KernelToCpuDispatch);
        packet.push_u64(7);
        let mut fields = packet.fields();
        assert_eq!(fields.u32("pid"), Err(ProtocolError::InvalidLength("pid")));
        assert_eq!(fields.u32("pc"), Err(ProtocolError::MissingField("pc")));
    }

    #[test]
    fn packet_header_layout_is_op_then_size() {
        let mut packet = Packet::new(OpCode::KernelToCpuDispatch);
        packet.push_u32(3).push_u32(9);
        let mut wire = Vec::new();
        write_packet(&mut wire, &packet).expect("write should succeed");
        assert_eq!(&wire[..4], &14u32.to_le_bytes());
        assert_eq!(&wire[4..8], &16u32.to_le_bytes());
        assert_eq!(wire.len(), 8 + 16);

        let decoded = read_packet(&mut wire.as_slice())
            .expect("read should succeed")
            .expect("packet should be present");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn read_packet_reports_clean_close_and_truncation() {
        let mut empty: &[u8] = &[];
        assert_eq!(read_packet(&mut empty), Ok(None));

        let mut partial: &[u8] = &[1, 0, 0];
        assert_eq!(
            read_packet(&mut partial),
            Err(ProtocolError::Io(io::ErrorKind::UnexpectedEof))
        );
    }

    #[test]
    fn read_packet_rejects_oversized_payload() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0u32.to_le_bytes());
        wire.extend_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            read_packet(&mut wire.as_slice()),
            Err(ProtocolError::InvalidLength("payload"))
        );
    }
}
