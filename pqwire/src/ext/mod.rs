use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while postgres want `i32`.
    ///
    /// Returns [`ProtocolError::TooLarge`] instead of wrapping.
    fn to_i32(self) -> Result<i32, ProtocolError>;
    /// Length is `usize` in rust, while postgres want `i16`.
    ///
    /// Returns [`ProtocolError::TooLarge`] instead of wrapping.
    fn to_i16(self) -> Result<i16, ProtocolError>;
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> usize;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Checked read operation in [`Bytes`].
///
/// Every read reports [`ProtocolError::Size`] when the body is shorter than the
/// message claims, instead of panicking like the plain [`Buf`] getters.
pub trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;

    /// Try to read exactly `len` bytes.
    fn get_exact(&mut self, len: usize) -> Result<Bytes, ProtocolError>;

    fn get_u8_checked(&mut self) -> Result<u8, ProtocolError>;

    fn get_i16_checked(&mut self) -> Result<i16, ProtocolError>;

    fn get_i32_checked(&mut self) -> Result<i32, ProtocolError>;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_i32(self) -> Result<i32, ProtocolError> {
        self.try_into().map_err(|_| ProtocolError::TooLarge { len: self })
    }

    fn to_i16(self) -> Result<i16, ProtocolError> {
        self.try_into().map_err(|_| ProtocolError::TooLarge { len: self })
    }
}

impl StrExt for str {
    fn nul_string_len(&self) -> usize {
        self.len() + 1/* nul */
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::Size { expect: self.len() + 1, found: self.len() });
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(ByteStr::from_utf8(me)?)
    }

    fn get_exact(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if self.len() < len {
            return Err(ProtocolError::Size { expect: len, found: self.len() });
        }
        Ok(self.split_to(len))
    }

    fn get_u8_checked(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.try_get_u8()?)
    }

    fn get_i16_checked(&mut self) -> Result<i16, ProtocolError> {
        Ok(self.try_get_i16()?)
    }

    fn get_i32_checked(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.try_get_i32()?)
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nul_string() {
        let mut b = Bytes::from_static(b"abc\0def\0");
        assert_eq!(b.get_nul_bytestr().unwrap(), "abc");
        assert_eq!(b.get_nul_bytestr().unwrap(), "def");
        assert!(b.is_empty());
    }

    #[test]
    fn unterminated_string_is_size_error() {
        let mut b = Bytes::from_static(b"abc");
        assert!(matches!(b.get_nul_bytestr(), Err(ProtocolError::Size { .. })));
    }

    #[test]
    fn short_integer_is_size_error() {
        let mut b = Bytes::from_static(&[0, 0, 1]);
        assert!(matches!(b.get_i32_checked(), Err(ProtocolError::Size { expect: 4, found: 3 })));
    }

    #[test]
    fn lossy_display() {
        assert_eq!(b"ok\x01".lossy().to_string(), "ok\\x1");
    }
}
