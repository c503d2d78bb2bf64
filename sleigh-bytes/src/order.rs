use byteorder::ByteOrder;

use crate::endian::Endian;
use crate::{BE, LE};

pub trait Order: ByteOrder + Send + Sync + 'static {
    const ENDIAN: Endian;
    const NATIVE: bool;

    fn read_u8(buf: &[u8]) -> u8 {
        if buf.is_empty() {
            0
        } else {
            buf[0]
        }
    }

    fn write_u8(buf: &mut [u8], n: u8) {
        if !buf.is_empty() {
            buf[0] = n;
        }
    }

    /// Reads an unsigned word spanning the whole of `buf`; an empty buffer
    /// reads as zero and only the first eight bytes are considered.
    fn read_word(buf: &[u8]) -> u64 {
        let size = buf.len().min(8);
        if size == 0 {
            0
        } else {
            Self::read_uint(&buf[..size], size)
        }
    }

    fn write_word(buf: &mut [u8], n: u64) {
        let size = buf.len().min(8);
        if size == 0 {
            return;
        }
        let n = if size < 8 { n & ((1u64 << (size * 8)) - 1) } else { n };
        Self::write_uint(&mut buf[..size], n, size)
    }
}

impl Order for BE {
    const ENDIAN: Endian = Endian::Big;
    const NATIVE: bool = cfg!(target_endian = "big");
}

impl Order for LE {
    const ENDIAN: Endian = Endian::Little;
    const NATIVE: bool = cfg!(target_endian = "little");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncated_writes() {
        let mut buf = [0u8; 3];
        BE::write_word(&mut buf, 0xaabbccdd);
        assert_eq!(buf, [0xbb, 0xcc, 0xdd]);
        assert_eq!(<BE as Order>::read_word(&buf), 0xbbccdd);
        assert_eq!(<LE as Order>::read_word(&[]), 0);
    }
}
