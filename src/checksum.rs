//! 128-bit content checksums.
//!
//! The entry table reserves 16 bytes per entry.  We fill them with the first
//! 16 bytes of the BLAKE3 digest of the entry's stored bytes.

use std::io::{self, Read, Write};

pub const CHECKSUM_LEN: usize = 16;

pub type Checksum = [u8; CHECKSUM_LEN];

pub fn checksum(data: &[u8]) -> Checksum {
    truncate(blake3::hash(data))
}

pub fn to_hex(sum: &Checksum) -> String {
    hex::encode(sum)
}

fn truncate(hash: blake3::Hash) -> Checksum {
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LEN]);
    out
}

/// Writer adapter that hashes and counts everything passing through it.
pub struct HashingWriter<W: Write> {
    inner:   W,
    hasher:  blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: blake3::Hasher::new(), written: 0 }
    }

    pub fn written(&self) -> u64 { self.written }

    pub fn finish(self) -> (W, Checksum, u64) {
        (self.inner, truncate(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash a stream to its end, returning the checksum and byte count.
pub fn checksum_reader<R: Read>(mut reader: R) -> io::Result<(Checksum, u64)> {
    let mut w = HashingWriter::new(io::sink());
    io::copy(&mut reader, &mut w)?;
    let (_, sum, len) = w.finish();
    Ok((sum, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"Hello World".repeat(1000);
        let (sum, len) = checksum_reader(&data[..]).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(sum, checksum(&data));
        assert_ne!(checksum(b"a"), checksum(b"b"));
        assert_eq!(to_hex(&sum).len(), 32);
    }
}
