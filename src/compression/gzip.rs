use std::io::prelude::*;

use flate2;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use errors::Result;

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    GzDecoder::new(data).read_to_end(&mut output)?;
    Ok(output)
}
