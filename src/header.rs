//! Fixed 96-byte container header.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "GDPC"
//!      4     4  format_version
//!      8    12  producer_version (major, minor, patch)
//!     20     4  flags (bit 0 = container encrypted)
//!     24     8  data_region_offset (absolute)
//!     32    64  reserved, zero-filled
//! ```
//!
//! All integers are little-endian.  Reserved bytes are written as zero and
//! ignored on read, so later versions can claim them.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read, Write};

use crate::error::{PckError, Result};

pub const MAGIC: &[u8; 4] = b"GDPC";
/// Version written by this build.
pub const FORMAT_VERSION: u32 = 1;
/// Oldest version this build reads.
pub const MIN_FORMAT_VERSION: u32 = 1;
pub const RESERVED_LEN: usize = 64;
pub const HEADER_SIZE: usize = 4 + 4 + 12 + 4 + 8 + RESERVED_LEN;

/// Container flag: the whole container is encrypted.  Carried, not acted on.
pub const FLAG_ENCRYPTED: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProducerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Version of this crate, stamped into containers it writes.
    pub fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

impl std::fmt::Display for ProducerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub format_version:     u32,
    pub producer_version:   ProducerVersion,
    pub flags:              u32,
    pub data_region_offset: u64,
}

impl Header {
    pub fn new(producer_version: ProducerVersion, flags: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            producer_version,
            flags,
            data_region_offset: HEADER_SIZE as u64,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.format_version);
        LittleEndian::write_u32(&mut buf[8..12], self.producer_version.major);
        LittleEndian::write_u32(&mut buf[12..16], self.producer_version.minor);
        LittleEndian::write_u32(&mut buf[16..20], self.producer_version.patch);
        LittleEndian::write_u32(&mut buf[20..24], self.flags);
        LittleEndian::write_u64(&mut buf[24..32], self.data_region_offset);
        buf
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Parse a header from the start of `buf`.
    ///
    /// A buffer that does not begin with the magic is `NotAContainer`, even
    /// when it is shorter than four bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
            return Err(PckError::NotAContainer);
        }
        if buf.len() < HEADER_SIZE {
            return Err(PckError::TruncatedData {
                offset:    0,
                needed:    HEADER_SIZE as u64,
                available: buf.len() as u64,
            });
        }

        let format_version = LittleEndian::read_u32(&buf[4..8]);
        if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&format_version) {
            return Err(PckError::UnsupportedVersion(format_version));
        }

        Ok(Self {
            format_version,
            producer_version: ProducerVersion {
                major: LittleEndian::read_u32(&buf[8..12]),
                minor: LittleEndian::read_u32(&buf[12..16]),
                patch: LittleEndian::read_u32(&buf[16..20]),
            },
            flags:              LittleEndian::read_u32(&buf[20..24]),
            data_region_offset: LittleEndian::read_u64(&buf[24..32]),
        })
    }

    /// Read and parse exactly [`HEADER_SIZE`] bytes from a stream.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        reader.take(HEADER_SIZE as u64).read_to_end(&mut buf)?;
        Self::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header {
            format_version:     FORMAT_VERSION,
            producer_version:   ProducerVersion::new(4, 2, 1),
            flags:              FLAG_ENCRYPTED,
            data_region_offset: 4096,
        }
    }

    #[test]
    fn layout_is_fixed() {
        let mut buf = Vec::new();
        sample().write(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], MAGIC);
        assert_eq!(&buf[8..12], &4u32.to_le_bytes());
        assert_eq!(&buf[24..32], &4096u64.to_le_bytes());
        assert!(buf[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_back() {
        let mut buf = Vec::new();
        sample().write(&mut buf).unwrap();
        let h = Header::read(&buf[..]).unwrap();
        assert_eq!(h, sample());
        assert!(h.is_encrypted());
    }

    #[test]
    fn rejects_foreign_and_short_input() {
        assert!(matches!(Header::decode(b"PK\x03\x04rest"), Err(PckError::NotAContainer)));
        assert!(matches!(Header::decode(b"GD"), Err(PckError::NotAContainer)));
        assert!(matches!(Header::decode(b"GDPC\x01\0\0\0"), Err(PckError::TruncatedData { .. })));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = Vec::new();
        sample().write(&mut buf).unwrap();
        buf[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(Header::decode(&buf), Err(PckError::UnsupportedVersion(99))));
        buf[4..8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(Header::decode(&buf), Err(PckError::UnsupportedVersion(0))));
    }
}
