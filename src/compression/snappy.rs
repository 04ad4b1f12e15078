//! Snappy with the xerial framing used by Kafka: a fixed magic header
//! followed by `i32`-length-prefixed compressed blocks of up to 32 KiB of
//! input each.

use byteorder::{BigEndian, ByteOrder};
use snap;

use errors::{ErrorKind, Result};

const DEFAULT_VERSION: i32 = 1;
const MIN_COMPAT_VERSION: i32 = 1;

const BLOCK_SIZE: usize = 32 * 1024;

const MAGIC: &'static [u8] = &[0x82, b'S', b'N', b'A', b'P', b'P', b'Y', 0];

fn header() -> Vec<u8> {
    let mut header = MAGIC.to_vec();
    let mut versions = [0u8; 8];
    BigEndian::write_i32(&mut versions[0..4], DEFAULT_VERSION);
    BigEndian::write_i32(&mut versions[4..8], MIN_COMPAT_VERSION);
    header.extend_from_slice(&versions);
    header
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = header();
    let mut encoder = snap::Encoder::new();

    for block in data.chunks(BLOCK_SIZE) {
        let compressed = encoder
            .compress_vec(block)
            .map_err(|_| ErrorKind::CodecError("snappy compression failed"))?;

        let mut size = [0u8; 4];
        BigEndian::write_i32(&mut size, compressed.len() as i32);
        output.extend_from_slice(&size);
        output.extend_from_slice(&compressed);
    }

    Ok(output)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let header_len = header().len();

    if data.len() < header_len || &data[..MAGIC.len()] != MAGIC {
        return Err(ErrorKind::CodecError("missing snappy framing header").into());
    }

    let mut output = Vec::new();
    let mut decoder = snap::Decoder::new();
    let mut offset = header_len;

    while offset + 4 <= data.len() {
        let block_size = BigEndian::read_i32(&data[offset..offset + 4]) as usize;
        offset += 4;

        if offset + block_size > data.len() {
            return Err(ErrorKind::CodecError("truncated snappy block").into());
        }

        let block = decoder
            .decompress_vec(&data[offset..offset + block_size])
            .map_err(|_| ErrorKind::CodecError("snappy decompression failed"))?;
        output.extend_from_slice(&block);
        offset += block_size;
    }

    Ok(output)
}
