//! Stream framing for the pub/sub transport
//!
//! A subscriber opens the connection with `[u8 topic_len][topic]`; after
//! that the publisher sends `[u32 BE length][message]` records.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::NetworkError;

const LENGTH_PREFIX: usize = 4;

/// Write the subscription handshake
pub fn write_subscription<W: Write>(writer: &mut W, topic: &[u8]) -> Result<(), NetworkError> {
    let len = u8::try_from(topic.len()).map_err(|_| NetworkError::MessageTooLarge(topic.len()))?;
    let mut buf = Vec::with_capacity(1 + topic.len());
    buf.push(len);
    buf.extend_from_slice(topic);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Read the subscription handshake
pub fn read_subscription<R: Read>(reader: &mut R) -> Result<Bytes, NetworkError> {
    let mut len = [0u8; 1];
    reader.read_exact(&mut len)?;
    let mut topic = vec![0u8; len[0] as usize];
    reader.read_exact(&mut topic)?;
    Ok(Bytes::from(topic))
}

/// Encode one length-prefixed record into `out`
pub fn encode_message(message: &[u8], out: &mut BytesMut) {
    out.reserve(LENGTH_PREFIX + message.len());
    out.put_u32(message.len() as u32);
    out.put_slice(message);
}

/// Reassembles length-prefixed records from arbitrary read chunks
pub struct MessageReader {
    buffer: BytesMut,
    max_message_size: usize,
}

impl MessageReader {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            max_message_size,
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete record, if one is buffered
    pub fn next_message(&mut self) -> Result<Option<Bytes>, NetworkError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len > self.max_message_size {
            return Err(NetworkError::MessageTooLarge(len));
        }
        if self.buffer.len() < LENGTH_PREFIX + len {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_handles_split_records() {
        let mut wire = BytesMut::new();
        encode_message(b"abcdefirst", &mut wire);
        encode_message(b"", &mut wire);
        encode_message(b"abcdesecond", &mut wire);

        let mut reader = MessageReader::new(1024);
        let mut out = Vec::new();
        // feed three bytes at a time
        for chunk in wire.chunks(3) {
            reader.extend(chunk);
            while let Some(message) = reader.next_message().unwrap() {
                out.push(message);
            }
        }

        assert_eq!(out.len(), 3);
        assert_eq!(&out[0][..], b"abcdefirst");
        assert!(out[1].is_empty());
        assert_eq!(&out[2][..], b"abcdesecond");
    }

    #[test]
    fn test_reader_rejects_oversize() {
        let mut wire = BytesMut::new();
        encode_message(&[0u8; 100], &mut wire);

        let mut reader = MessageReader::new(10);
        reader.extend(&wire);
        assert!(matches!(
            reader.next_message(),
            Err(NetworkError::MessageTooLarge(100))
        ));
    }

    #[test]
    fn test_subscription_handshake() {
        let mut wire = Vec::new();
        write_subscription(&mut wire, b"abcde").unwrap();
        assert_eq!(wire, b"\x05abcde");

        let topic = read_subscription(&mut wire.as_slice()).unwrap();
        assert_eq!(&topic[..], b"abcde");
    }
}
