use crate::prelude::*;
use crate::solivia::catalog::{Catalog, CommandCode};
use crate::solivia::checksum::{checksum, checksum_bytes};

use bytes::BytesMut;
use nom::{
    multi::length_data,
    number::complete::{be_u8, le_u16},
    IResult,
};
use tokio_util::codec::Decoder;

// [address][command_hi][command_lo][length]
pub const HEADER_LEN: usize = 4;
pub const CHECKSUM_LEN: usize = 2;
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub command: CommandCode,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    pub fn length(&self) -> u8 {
        self.payload.len() as u8
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("frame length mismatch: header declares {declared} bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },
    #[error("unknown command {0}")]
    UnknownCommand(CommandCode),
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLong(usize),
}

/// Request frame asking the device at `address` for `command`. Read
/// requests carry no payload.
pub fn encode_request(address: u8, command: CommandCode) -> Vec<u8> {
    let mut r = Vec::with_capacity(HEADER_LEN + CHECKSUM_LEN);
    r.push(address);
    r.extend_from_slice(&command.bytes());
    r.push(0);
    let crc = checksum_bytes(&r);
    r.extend_from_slice(&crc);
    r
}

pub fn encode_frame(address: u8, command: CommandCode, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong(payload.len()));
    }

    let mut r = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    r.push(address);
    r.extend_from_slice(&command.bytes());
    r.push(payload.len() as u8);
    r.extend_from_slice(payload);
    let crc = checksum_bytes(&r);
    r.extend_from_slice(&crc);

    Ok(r)
}

fn parse_frame(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, &[u8], u16)> {
    let (input, address) = be_u8(input)?;
    let (input, command_hi) = be_u8(input)?;
    let (input, command_lo) = be_u8(input)?;
    let (input, payload) = length_data(be_u8)(input)?;
    let (input, crc) = le_u16(input)?;
    Ok((input, (address, command_hi, command_lo, payload, crc)))
}

/// Validates one complete response frame. Length and checksum are checked
/// before anything is read from the payload; the command must be known to
/// `catalog`.
pub fn decode_response(input: &[u8], catalog: &Catalog) -> Result<Frame, FrameError> {
    let available = input.len();
    if available < HEADER_LEN + CHECKSUM_LEN {
        return Err(FrameError::Truncated {
            needed: HEADER_LEN + CHECKSUM_LEN,
            available,
        });
    }

    let declared = HEADER_LEN + input[3] as usize + CHECKSUM_LEN;
    if available < declared {
        return Err(FrameError::Truncated {
            needed: declared,
            available,
        });
    }
    if available > declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: available,
        });
    }

    let (_, (address, command_hi, command_lo, payload, received)) =
        parse_frame(input).map_err(|_| FrameError::Truncated {
            needed: declared,
            available,
        })?;

    let computed = checksum(&input[..declared - CHECKSUM_LEN]);
    if received != computed {
        return Err(FrameError::ChecksumMismatch { received, computed });
    }

    let command = CommandCode::new(command_hi, command_lo);
    if !catalog.contains(command) {
        return Err(FrameError::UnknownCommand(command));
    }

    Ok(Frame {
        address,
        command,
        payload: payload.to_vec(),
        checksum: received,
    })
}

/// Splits a serial byte stream into candidate frames using the length
/// byte. Validation is left to `decode_response`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameDecoder {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN + CHECKSUM_LEN - src.len());
            return Ok(None);
        }

        let frame_len = HEADER_LEN + src[3] as usize + CHECKSUM_LEN;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_waits_for_whole_frame() {
        let frame = encode_frame(1, CommandCode::new(0x10, 0x09), &[0x04, 0xB0]).unwrap();
        let mut decoder = FrameDecoder::new();

        let mut buf = BytesMut::from(&frame[..5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[5..]);
        buf.extend_from_slice(&[0x01]);
        let raw = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&raw[..], &frame[..]);
        assert_eq!(&buf[..], &[0x01]);
    }

    #[test]
    fn parse_frame_reads_fields() {
        let frame = encode_frame(7, CommandCode::new(0x13, 0x03), &[0x00, 0x2A]).unwrap();
        let (rest, (address, hi, lo, payload, crc)) = parse_frame(&frame).unwrap();
        assert!(rest.is_empty());
        assert_eq!((address, hi, lo), (7, 0x13, 0x03));
        assert_eq!(payload, &[0x00, 0x2A]);
        assert_eq!(crc, checksum(&frame[..6]));
    }
}
