// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

//! Byte-string codecs.
//!
//! Two encodings are provided: compact (length-prefixed, for record
//! bodies) and memcomparable (order-preserving, for byte strings embedded
//! inside keys). The memcomparable form pads input to 8-byte groups; each
//! group is followed by a marker of `0xFF - pad_count` so that encoded
//! strings compare the same way the originals do and no encoded string is
//! a prefix of another.

use super::number::{NumberDecoder, NumberEncoder};
use super::{Error, Result};

const ENC_GROUP_SIZE: usize = 8;
const ENC_MARKER: u8 = 0xff;
const ENC_PAD: u8 = 0x00;

pub trait CompactBytesEncoder: NumberEncoder {
    fn encode_compact_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.encode_var_u64(data.len() as u64)?;
        self.write_all(data)?;
        Ok(())
    }
}

impl<T: NumberEncoder> CompactBytesEncoder for T {}

pub trait CompactBytesDecoder: NumberDecoder {
    fn decode_compact_bytes(&mut self) -> Result<Vec<u8>>;
}

impl CompactBytesDecoder for &[u8] {
    fn decode_compact_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.decode_var_u64()? as usize;
        if self.len() < len {
            return Err(Error::BufferTooShort);
        }
        let data = self[..len].to_vec();
        *self = &self[len..];
        Ok(data)
    }
}

/// Appends the memcomparable encoding of `key` to `buf`.
pub fn encode_bytes(buf: &mut Vec<u8>, key: &[u8]) {
    let cap = (key.len() / ENC_GROUP_SIZE + 1) * (ENC_GROUP_SIZE + 1);
    buf.reserve(cap);
    for chunk in key.chunks(ENC_GROUP_SIZE) {
        buf.extend_from_slice(chunk);
        let pad = ENC_GROUP_SIZE - chunk.len();
        buf.extend(std::iter::repeat(ENC_PAD).take(pad));
        buf.push(ENC_MARKER - pad as u8);
    }
    if key.len() % ENC_GROUP_SIZE == 0 {
        buf.extend_from_slice(&[ENC_PAD; ENC_GROUP_SIZE]);
        buf.push(ENC_MARKER - ENC_GROUP_SIZE as u8);
    }
}

pub fn encode_bytes_to_vec(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_bytes(&mut buf, key);
    buf
}

/// Decodes a memcomparable byte string from the front of `data`,
/// advancing it past the encoding.
pub fn decode_bytes(data: &mut &[u8]) -> Result<Vec<u8>> {
    let mut key = Vec::with_capacity(data.len());
    loop {
        if data.len() < ENC_GROUP_SIZE + 1 {
            return Err(Error::BufferTooShort);
        }
        let (group, marker) = (&data[..ENC_GROUP_SIZE], data[ENC_GROUP_SIZE]);
        let pad = (ENC_MARKER - marker) as usize;
        if pad > ENC_GROUP_SIZE {
            return Err(Error::BadFormat("bytes group marker"));
        }
        let real = ENC_GROUP_SIZE - pad;
        if group[real..].iter().any(|&b| b != ENC_PAD) {
            return Err(Error::BadPadding);
        }
        key.extend_from_slice(&group[..real]);
        *data = &data[ENC_GROUP_SIZE + 1..];
        if pad != 0 {
            return Ok(key);
        }
    }
}
