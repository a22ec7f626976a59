//! Byte-level encoding of the MQTT 3.1.1 subset used by the lock
//!
//! Only QoS 0 traffic is supported: CONNECT/CONNACK, SUBSCRIBE/SUBACK, PUBLISH and
//! PINGREQ. Nothing in here touches a socket; decoding works on any [`Read`].

use std::io::{self, Read};

use super::error::{ConnectError, ProtocolError, SubscribeError};

// Fixed header bytes
pub const CONNECT: u8 = 0x10;
pub const PUBLISH: u8 = 0x30;
pub const SUBSCRIBE: u8 = 0x82;
pub const PINGREQ: u8 = 0xC0;

pub const KEEP_ALIVE_SECS: u16 = 60;

/// Largest value four base-128 bytes can carry (2^28 - 1)
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_LEVEL: u8 = 0x04;
const FLAG_CLEAN_START: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USER: u8 = 0x80;

/// Packet type as carried in the high nibble of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Connect,
    Connack,
    Publish,
    Subscribe,
    Suback,
    Pingreq,
    Pingresp,
    Other(u8),
}

impl PacketKind {
    pub fn from_header(header: u8) -> Self {
        match header >> 4 {
            1 => PacketKind::Connect,
            2 => PacketKind::Connack,
            3 => PacketKind::Publish,
            8 => PacketKind::Subscribe,
            9 => PacketKind::Suback,
            12 => PacketKind::Pingreq,
            13 => PacketKind::Pingresp,
            n => PacketKind::Other(n),
        }
    }
}

pub fn encode_remaining_length(mut length: usize) -> Result<Vec<u8>, ProtocolError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::LengthOverflow(length));
    }
    let mut encoded = Vec::with_capacity(4);
    loop {
        let mut digit = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            digit |= 0x80;
        }
        encoded.push(digit);
        if length == 0 {
            return Ok(encoded);
        }
    }
}

pub fn decode_remaining_length<R: Read + ?Sized>(stream: &mut R) -> Result<usize, ProtocolError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    for _ in 0..4 {
        let digit = read_u8(stream)?;
        value += (digit & 0x7F) as usize * multiplier;
        if digit & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }
    Err(ProtocolError::Malformed(
        "remaining length uses more than four bytes".to_string(),
    ))
}

/// Builds a CONNECT packet. The clean-start flag is always set; the user and password
/// flags follow the presence of the respective credential.
pub fn encode_connect(
    client_id: &str,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut flags = FLAG_CLEAN_START;
    if user.is_some() {
        flags |= FLAG_USER;
    }
    if password.is_some() {
        flags |= FLAG_PASSWORD;
    }
    let keep_alive = KEEP_ALIVE_SECS.to_be_bytes();
    let variable_header = [
        0x00,
        0x04,
        b'M',
        b'Q',
        b'T',
        b'T',
        PROTOCOL_LEVEL,
        flags,
        keep_alive[0],
        keep_alive[1],
    ];

    let mut payload = Vec::new();
    put_string(&mut payload, client_id)?;
    if let Some(user) = user {
        put_string(&mut payload, user)?;
    }
    if let Some(password) = password {
        put_string(&mut payload, password)?;
    }

    let mut packet = vec![CONNECT];
    packet.extend(encode_remaining_length(
        variable_header.len() + payload.len(),
    )?);
    packet.extend_from_slice(&variable_header);
    packet.extend(payload);
    Ok(packet)
}

/// Checks the 4-byte CONNACK; the fourth byte is the return code.
pub fn decode_connack(bytes: &[u8]) -> Result<(), ConnectError> {
    match bytes {
        [_, _, _, 0] => Ok(()),
        [_, _, _, code] => Err(ConnectError::Rejected(*code)),
        _ => Err(ConnectError::Malformed(bytes.to_vec())),
    }
}

pub fn encode_subscribe(packet_id: u16, topic: &str, qos: u8) -> Result<Vec<u8>, ProtocolError> {
    let topic_len = checked_str_len(topic)?;
    let mut packet = vec![SUBSCRIBE];
    packet.extend(encode_remaining_length(2 + 2 + topic.len() + 1)?);
    packet.extend_from_slice(&packet_id.to_be_bytes());
    packet.extend_from_slice(&topic_len.to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.push(qos);
    Ok(packet)
}

pub fn decode_suback_header(bytes: &[u8]) -> Result<(), SubscribeError> {
    match bytes.first() {
        Some(&header) if PacketKind::from_header(header) == PacketKind::Suback => Ok(()),
        Some(&header) => Err(SubscribeError::UnexpectedResponse(header)),
        None => Err(SubscribeError::Io(io::ErrorKind::UnexpectedEof.into())),
    }
}

/// QoS 0 PUBLISH without DUP or RETAIN, so there is no packet id.
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let topic_len = checked_str_len(topic)?;
    let mut packet = vec![PUBLISH];
    packet.extend(encode_remaining_length(2 + topic.len() + payload.len())?);
    packet.extend_from_slice(&topic_len.to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

pub fn encode_pingreq() -> [u8; 2] {
    [PINGREQ, 0x00]
}

/// Reads one packet from `stream`. Returns `None` for anything that is not a PUBLISH.
pub fn decode_publish<R: Read + ?Sized>(stream: &mut R) -> Result<Option<(String, String)>, ProtocolError> {
    let header = read_u8(stream)?;
    decode_publish_body(header, stream)
}

/// Continues decoding after the fixed-header byte has already been consumed.
///
/// Packets of other kinds are drained completely so that the next read starts on a
/// packet boundary.
pub fn decode_publish_body<R: Read + ?Sized>(
    header: u8,
    stream: &mut R,
) -> Result<Option<(String, String)>, ProtocolError> {
    let remaining = decode_remaining_length(stream)?;

    if PacketKind::from_header(header) != PacketKind::Publish {
        let skipped = io::copy(&mut Read::take(&mut *stream, remaining as u64), &mut io::sink())?;
        if skipped as usize != remaining {
            return Err(ProtocolError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        return Ok(None);
    }

    let mut len_bytes = [0u8; 2];
    stream.read_exact(&mut len_bytes)?;
    let topic_len = u16::from_be_bytes(len_bytes) as usize;
    let Some(payload_len) = remaining.checked_sub(2 + topic_len) else {
        // keep the stream on a packet boundary before reporting
        io::copy(
            &mut Read::take(&mut *stream, remaining.saturating_sub(2) as u64),
            &mut io::sink(),
        )?;
        return Err(ProtocolError::Malformed(format!(
            "topic length {} does not fit remaining length {}",
            topic_len, remaining
        )));
    };

    // both fields are consumed before validation so a bad topic leaves the stream aligned
    let topic = read_bytes(stream, topic_len)?;
    let payload = read_bytes(stream, payload_len)?;
    Ok(Some((utf8(topic, "topic")?, utf8(payload, "payload")?)))
}

fn read_u8<R: Read + ?Sized>(stream: &mut R) -> Result<u8, ProtocolError> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Grows the buffer only with bytes actually received, never up front from `len`.
fn read_bytes<R: Read + ?Sized>(stream: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    Read::take(&mut *stream, len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(ProtocolError::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}

fn utf8(bytes: Vec<u8>, field: &str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes)
        .map_err(|e| ProtocolError::Malformed(format!("{} is not valid UTF-8: {}", field, e)))
}

fn checked_str_len(s: &str) -> Result<u16, ProtocolError> {
    u16::try_from(s.len()).map_err(|_| ProtocolError::TopicTooLong(s.len()))
}

fn put_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    buf.extend_from_slice(&checked_str_len(s)?.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}
