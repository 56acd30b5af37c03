// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Measurement datagram decoder.
//!
//! Producers publish one measurement per UDP datagram:
//!
//! ```text
//! +----------------------+-----------+----------------------------+
//! | Topic (50B, NUL pad) | Kind (1B) | Payload (0..=1500B)        |
//! +----------------------+-----------+----------------------------+
//! ```
//!
//! Payload layout per kind (all integers big-endian):
//!
//! | Kind | Tag | Layout |
//! |------|-----|--------|
//! | `INT` | 0 | sign (1B) + magnitude (u32) |
//! | `SHORT_REAL` | 1 | magnitude x 100 (u16) |
//! | `FLOAT` | 2 | sign (1B) + mantissa (u32) + negative power of ten (1B) |
//! | `STRING` | 3 | text, terminated by NUL or end of datagram |
//!
//! Decoding is pure: a datagram either yields a complete [`Measurement`] or a
//! [`DecodeError`], never a partially filled value.

use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Size of the fixed topic field.
pub const TOPIC_LEN: usize = 50;

/// Topic field plus the kind tag.
pub const HEADER_LEN: usize = TOPIC_LEN + 1;

/// Largest payload a producer may send.
pub const MAX_PAYLOAD_LEN: usize = 1500;

/// Largest valid datagram.
pub const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

const INT_PAYLOAD_LEN: usize = 5;
const SHORT_REAL_PAYLOAD_LEN: usize = 2;
const FLOAT_PAYLOAD_LEN: usize = 6;
const FLOAT_EXPONENT_OFFSET: usize = 5;

/// Errors produced while decoding a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Datagram does not fit the measurement layout.
    #[error("malformed measurement: {0}")]
    MalformedMeasurement(String),

    /// Kind tag is not one of the known value kinds.
    #[error("unknown measurement kind {0}")]
    UnknownKind(u8),
}

/// Value kind carried in the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Int = 0,
    ShortReal = 1,
    Float = 2,
    String = 3,
}

impl ValueKind {
    /// Label used in formatted lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::ShortReal => "SHORT_REAL",
            Self::Float => "FLOAT",
            Self::String => "STRING",
        }
    }
}

impl TryFrom<u8> for ValueKind {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Int),
            1 => Ok(Self::ShortReal),
            2 => Ok(Self::Float),
            3 => Ok(Self::String),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded measurement value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    /// Signed integer.
    Int(i64),

    /// Fixed-point real stored as hundredths.
    ShortReal(u16),

    /// Scaled real: `mantissa x 10^-exponent`, negated when `negative`.
    Float {
        negative: bool,
        mantissa: u32,
        exponent: u8,
    },

    /// Verbatim text bytes (not necessarily UTF-8).
    Text(Vec<u8>),
}

impl DecodedValue {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::ShortReal(_) => ValueKind::ShortReal,
            Self::Float { .. } => ValueKind::Float,
            Self::Text(_) => ValueKind::String,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::ShortReal(raw) => {
                let whole = raw / 100;
                let hundredths = raw % 100;
                if hundredths == 0 {
                    write!(f, "{}", whole)
                } else {
                    let fraction = format!("{:02}", hundredths);
                    write!(f, "{}.{}", whole, fraction.trim_end_matches('0'))
                }
            }
            Self::Float {
                negative,
                mantissa,
                exponent,
            } => {
                if *negative && *mantissa != 0 {
                    f.write_str("-")?;
                }
                f.write_str(&scaled_decimal(*mantissa, *exponent))
            }
            Self::Text(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
        }
    }
}

/// Renders `mantissa x 10^-exponent` exactly, with `exponent` fractional digits.
fn scaled_decimal(mantissa: u32, exponent: u8) -> String {
    let digits = mantissa.to_string();
    let exponent = usize::from(exponent);
    if exponent == 0 {
        return digits;
    }

    let padded = if digits.len() <= exponent {
        format!("{}{}", "0".repeat(exponent + 1 - digits.len()), digits)
    } else {
        digits
    };
    let split = padded.len() - exponent;
    format!("{}.{}", &padded[..split], &padded[split..])
}

/// One decoded measurement, tagged with the producer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    source: SocketAddr,
    topic: String,
    value: DecodedValue,
}

impl Measurement {
    /// Build a measurement from already-decoded parts.
    pub fn new(source: SocketAddr, topic: impl Into<String>, value: DecodedValue) -> Self {
        Self {
            source,
            topic: topic.into(),
            value,
        }
    }

    /// Decode one datagram received from `source`.
    pub fn decode(source: SocketAddr, datagram: &[u8]) -> Result<Self, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::MalformedMeasurement(format!(
                "datagram too short: {} < {}",
                datagram.len(),
                HEADER_LEN
            )));
        }
        if datagram.len() > MAX_DATAGRAM_LEN {
            return Err(DecodeError::MalformedMeasurement(format!(
                "datagram too large: {} > {}",
                datagram.len(),
                MAX_DATAGRAM_LEN
            )));
        }

        let topic = String::from_utf8_lossy(until_nul(&datagram[..TOPIC_LEN])).into_owned();
        let kind = ValueKind::try_from(datagram[TOPIC_LEN])?;
        let payload = &datagram[HEADER_LEN..];
        let value = decode_value(kind, payload)?;

        Ok(Self {
            source,
            topic,
            value,
        })
    }

    /// Producer address.
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Decoded value.
    pub fn value(&self) -> &DecodedValue {
        &self.value
    }

    /// Value kind.
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    /// Line forwarded to consumers:
    /// `"<ip>:<port> - <topic> - <KIND> - <value>\n"`.
    ///
    /// STRING payloads are copied byte for byte, so the line is raw bytes.
    pub fn line(&self) -> Vec<u8> {
        let mut line = format!(
            "{}:{} - {} - {} - ",
            self.source.ip(),
            self.source.port(),
            self.topic,
            self.kind()
        )
        .into_bytes();
        match &self.value {
            DecodedValue::Text(bytes) => line.extend_from_slice(bytes),
            value => line.extend_from_slice(value.to_string().as_bytes()),
        }
        line.push(b'\n');
        line
    }
}

fn decode_value(kind: ValueKind, payload: &[u8]) -> Result<DecodedValue, DecodeError> {
    match kind {
        ValueKind::Int => {
            let bytes = require(kind, payload, INT_PAYLOAD_LEN)?;
            let magnitude = i64::from(read_u32(&bytes[1..5]));
            Ok(DecodedValue::Int(if bytes[0] != 0 {
                -magnitude
            } else {
                magnitude
            }))
        }
        ValueKind::ShortReal => {
            let bytes = require(kind, payload, SHORT_REAL_PAYLOAD_LEN)?;
            Ok(DecodedValue::ShortReal(u16::from_be_bytes([
                bytes[0], bytes[1],
            ])))
        }
        ValueKind::Float => {
            let bytes = require(kind, payload, FLOAT_PAYLOAD_LEN)?;
            Ok(DecodedValue::Float {
                negative: bytes[0] != 0,
                mantissa: read_u32(&bytes[1..5]),
                exponent: bytes[FLOAT_EXPONENT_OFFSET],
            })
        }
        ValueKind::String => Ok(DecodedValue::Text(until_nul(payload).to_vec())),
    }
}

fn require(kind: ValueKind, payload: &[u8], len: usize) -> Result<&[u8], DecodeError> {
    payload.get(..len).ok_or_else(|| {
        DecodeError::MalformedMeasurement(format!(
            "{} payload needs {} bytes, got {}",
            kind,
            len,
            payload.len()
        ))
    })
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "10.0.0.7:4242".parse().unwrap()
    }

    fn datagram(topic: &str, tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; TOPIC_LEN];
        buf[..topic.len()].copy_from_slice(topic.as_bytes());
        buf.push(tag);
        buf.extend_from_slice(payload);
        buf
    }

    fn int_payload(sign: u8, value: u32) -> Vec<u8> {
        let mut p = vec![sign];
        p.extend_from_slice(&value.to_be_bytes());
        p
    }

    #[test]
    fn test_int_positive() {
        let m = Measurement::decode(source(), &datagram("temp", 0, &int_payload(0, 100))).unwrap();
        assert_eq!(m.value(), &DecodedValue::Int(100));
        assert!(m.line().ends_with(b"INT - 100\n"));
    }

    #[test]
    fn test_int_negative() {
        let m = Measurement::decode(source(), &datagram("temp", 0, &int_payload(1, 100))).unwrap();
        assert_eq!(m.value(), &DecodedValue::Int(-100));
        assert!(m.line().ends_with(b"INT - -100\n"));
    }

    #[test]
    fn test_int_negative_zero_renders_as_zero() {
        let m = Measurement::decode(source(), &datagram("t", 0, &int_payload(1, 0))).unwrap();
        assert_eq!(m.value().to_string(), "0");
    }

    #[test]
    fn test_int_full_range() {
        let m = Measurement::decode(source(), &datagram("t", 0, &int_payload(7, u32::MAX))).unwrap();
        assert_eq!(m.value(), &DecodedValue::Int(-i64::from(u32::MAX)));
    }

    #[test]
    fn test_short_real() {
        let m = Measurement::decode(source(), &datagram("hum", 1, &150u16.to_be_bytes())).unwrap();
        assert_eq!(m.value().to_string(), "1.5");
        assert!(m.line().ends_with(b"SHORT_REAL - 1.5\n"));
    }

    #[test]
    fn test_short_real_rendering() {
        assert_eq!(DecodedValue::ShortReal(100).to_string(), "1");
        assert_eq!(DecodedValue::ShortReal(1234).to_string(), "12.34");
        assert_eq!(DecodedValue::ShortReal(5).to_string(), "0.05");
        assert_eq!(DecodedValue::ShortReal(0).to_string(), "0");
    }

    #[test]
    fn test_float() {
        let payload = [0, 0, 0, 0x01, 0x3a, 2]; // 314, 10^-2
        let m = Measurement::decode(source(), &datagram("pi", 2, &payload)).unwrap();
        assert_eq!(m.value().to_string(), "3.14");
        assert!(m.line().ends_with(b"FLOAT - 3.14\n"));
    }

    #[test]
    fn test_float_negative_and_small() {
        let value = DecodedValue::Float {
            negative: true,
            mantissa: 5,
            exponent: 3,
        };
        assert_eq!(value.to_string(), "-0.005");

        let whole = DecodedValue::Float {
            negative: false,
            mantissa: 42,
            exponent: 0,
        };
        assert_eq!(whole.to_string(), "42");
    }

    #[test]
    fn test_string() {
        let m = Measurement::decode(source(), &datagram("greet", 3, b"hello\0")).unwrap();
        assert_eq!(m.value(), &DecodedValue::Text("hello".into()));
        assert!(m.line().ends_with(b"STRING - hello\n"));
    }

    #[test]
    fn test_string_without_terminator() {
        let m = Measurement::decode(source(), &datagram("greet", 3, b"hello")).unwrap();
        assert_eq!(m.value(), &DecodedValue::Text("hello".into()));
    }

    #[test]
    fn test_string_bytes_kept_verbatim() {
        let m = Measurement::decode(source(), &datagram("raw", 3, &[0xB0, b'C', 0xFF])).unwrap();
        assert_eq!(m.value(), &DecodedValue::Text(vec![0xB0, b'C', 0xFF]));
        assert!(m.line().ends_with(&[b'-', b' ', 0xB0, b'C', 0xFF, b'\n']));
    }

    #[test]
    fn test_longest_string_line_fits_frame() {
        let topic = "t".repeat(TOPIC_LEN);
        let payload = vec![0xFF; MAX_PAYLOAD_LEN];
        let source: SocketAddr = "255.255.255.255:65535".parse().unwrap();
        let m = Measurement::decode(source, &datagram(&topic, 3, &payload)).unwrap();
        assert!(crate::frame::encode_frame(m.line()).is_ok());
    }

    #[test]
    fn test_line_format() {
        let m = Measurement::decode(source(), &datagram("a/b", 0, &int_payload(0, 7))).unwrap();
        assert_eq!(m.line(), b"10.0.0.7:4242 - a/b - INT - 7\n");
    }

    #[test]
    fn test_full_width_topic() {
        let topic = "x".repeat(TOPIC_LEN);
        let m = Measurement::decode(source(), &datagram(&topic, 0, &int_payload(0, 1))).unwrap();
        assert_eq!(m.topic(), topic);
    }

    #[test]
    fn test_unknown_kind() {
        let err = Measurement::decode(source(), &datagram("t", 9, &[0; 8])).unwrap_err();
        assert_eq!(err, DecodeError::UnknownKind(9));
    }

    #[test]
    fn test_short_header() {
        let err = Measurement::decode(source(), &[0u8; HEADER_LEN - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMeasurement(_)));
    }

    #[test]
    fn test_truncated_payloads() {
        for (tag, len) in [(0u8, 4usize), (1, 1), (2, 5)] {
            let err = Measurement::decode(source(), &datagram("t", tag, &vec![0; len])).unwrap_err();
            assert!(
                matches!(err, DecodeError::MalformedMeasurement(_)),
                "tag {} len {}",
                tag,
                len
            );
        }
    }

    #[test]
    fn test_oversized_payload() {
        let payload = vec![b'a'; MAX_PAYLOAD_LEN + 1];
        let err = Measurement::decode(source(), &datagram("t", 3, &payload)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMeasurement(_)));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ValueKind::try_from(1).unwrap().as_str(), "SHORT_REAL");
        assert_eq!(ValueKind::Float.to_string(), "FLOAT");
    }
}
