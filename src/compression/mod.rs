use std::fmt;
use std::str::FromStr;

use errors::{Error, ErrorKind, Result};

pub mod gzip;
pub mod snappy;

/// Compression scheme applied to a message set, encoded in the low two bits
/// of a message's attributes byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Compression {
    None = 0,
    Gzip = 1,
    Snappy = 2,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

impl Compression {
    /// The value stored in a message's attributes byte.
    pub fn attribute_bits(&self) -> i8 {
        *self as i8
    }

    /// Decodes the low two bits of an attributes byte.  The reserved value
    /// `3` has no codec assigned to it.
    pub fn from_attributes(attributes: i8) -> Option<Compression> {
        match attributes & 0x03 {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Snappy),
            _ => None,
        }
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => gzip::compress(data),
            Compression::Snappy => snappy::compress(data),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match *self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => gzip::decompress(data),
            Compression::Snappy => snappy::decompress(data),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Snappy => write!(f, "snappy"),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "snappy" => Ok(Compression::Snappy),
            _ => Err(ErrorKind::InvalidCompression(s.to_owned()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_bits() {
        assert_eq!(Compression::from_attributes(0), Some(Compression::None));
        assert_eq!(Compression::from_attributes(1), Some(Compression::Gzip));
        assert_eq!(Compression::from_attributes(2), Some(Compression::Snappy));
        assert_eq!(Compression::from_attributes(3), None);
        // only the low two bits matter
        assert_eq!(Compression::from_attributes(0x0c), Some(Compression::None));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("snappy".parse::<Compression>().unwrap(), Compression::Snappy);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("lz4".parse::<Compression>().is_err());
    }

    #[test]
    fn test_round_trips() {
        let payload = b"a man a plan a canal".repeat(100);

        for compression in &[Compression::Gzip, Compression::Snappy] {
            let compressed = compression.compress(&payload).unwrap();
            assert_ne!(compressed, payload);
            assert_eq!(compression.decompress(&compressed).unwrap(), payload);
        }
    }
}
