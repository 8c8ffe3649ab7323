use bytes::Buf;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Error, ErrorKind, Read};

pub fn hash_256(input: impl AsRef<[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Canonical binary encoding used on the wire and for all entity identities.
///
/// Integers are fixed-width big-endian, byte strings and sequences carry a
/// u32 length prefix, options a single-byte discriminant and enums a single
/// byte tag. The same value always encodes to the same bytes on every
/// platform.
pub trait Streamable {
    fn stream(&self, out: &mut Vec<u8>);
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error>
    where
        Self: Sized;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.stream(&mut out);
        out
    }

    /// Strict decode: trailing bytes are an error, so `from_bytes` accepts
    /// exactly the canonical encoding and nothing else.
    fn from_bytes(bytes: &[u8]) -> Result<Self, Error>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);
        let value = Self::parse(&mut cursor)?;
        if cursor.remaining() > 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("{} trailing bytes after value", cursor.remaining()),
            ));
        }
        Ok(value)
    }
}

fn read_len(input: &mut Cursor<&[u8]>, what: &str) -> Result<usize, Error> {
    let mut len_buf = [0u8; 4];
    input.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    // a declared length can never exceed what is left in the buffer, and
    // every element takes at least one byte; reject before allocating
    if len > input.remaining() {
        return Err(Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "{what} length {len} exceeds {} remaining bytes",
                input.remaining()
            ),
        ));
    }
    Ok(len)
}

impl Streamable for () {
    fn stream(&self, _out: &mut Vec<u8>) {}
    fn parse(_input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(())
    }
}

impl Streamable for bool {
    fn stream(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let mut buf = [0u8; 1];
        input.read_exact(&mut buf)?;
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid bool byte: {other}"),
            )),
        }
    }
}

impl Streamable for String {
    fn stream(&self, out: &mut Vec<u8>) {
        out.extend((self.len() as u32).to_be_bytes());
        out.extend(self.as_bytes());
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let len = read_len(input, "string")?;
        let mut buf = vec![0u8; len];
        input.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid utf-8: {e}")))
    }
}

impl<T: Streamable> Streamable for Option<T> {
    fn stream(&self, out: &mut Vec<u8>) {
        match self {
            Some(value) => {
                out.push(1);
                value.stream(out);
            }
            None => out.push(0),
        }
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let mut buf = [0u8; 1];
        input.read_exact(&mut buf)?;
        match buf[0] {
            0 => Ok(None),
            1 => Ok(Some(T::parse(input)?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid option discriminant: {other}"),
            )),
        }
    }
}

impl<T: Streamable> Streamable for Vec<T> {
    fn stream(&self, out: &mut Vec<u8>) {
        out.extend((self.len() as u32).to_be_bytes());
        for element in self {
            element.stream(out);
        }
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let len = read_len(input, "sequence")?;
        let mut values = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            values.push(T::parse(input)?);
        }
        Ok(values)
    }
}

impl<T: Streamable, U: Streamable> Streamable for (T, U) {
    fn stream(&self, out: &mut Vec<u8>) {
        self.0.stream(out);
        self.1.stream(out);
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok((T::parse(input)?, U::parse(input)?))
    }
}

impl<T: Streamable, U: Streamable, V: Streamable> Streamable for (T, U, V) {
    fn stream(&self, out: &mut Vec<u8>) {
        self.0.stream(out);
        self.1.stream(out);
        self.2.stream(out);
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok((T::parse(input)?, U::parse(input)?, V::parse(input)?))
    }
}

macro_rules! impl_int {
    ($($ty:ident),*) => {
        $(
            impl Streamable for $ty {
                fn stream(&self, out: &mut Vec<u8>) {
                    out.extend(self.to_be_bytes());
                }
                fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    input.read_exact(&mut buf)?;
                    Ok($ty::from_be_bytes(buf))
                }
            }
        )*
    };
}
impl_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Streamable + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = value.to_bytes();
        assert_eq!(T::from_bytes(&bytes).unwrap(), value);
        // encoding is deterministic
        assert_eq!(value.to_bytes(), bytes);
    }

    #[test]
    fn test_primitive_round_trips() {
        round_trip(0u8);
        round_trip(u16::MAX);
        round_trip(0xDEAD_BEEFu32);
        round_trip(u64::MAX);
        round_trip(u128::MAX);
        round_trip(-1i64);
        round_trip(true);
        round_trip(String::from("evergreen"));
        round_trip(Some(42u32));
        round_trip(Option::<u32>::None);
        round_trip(vec![1u64, 2, 3]);
        round_trip((7u8, String::from("x"), vec![9u16]));
    }

    #[test]
    fn test_big_endian_layout() {
        assert_eq!(0x0102_0304u32.to_bytes(), vec![1, 2, 3, 4]);
        assert_eq!(vec![0xABu8].to_bytes(), vec![0, 0, 0, 1, 0xAB]);
        assert_eq!(Some(5u8).to_bytes(), vec![1, 5]);
        assert_eq!(Option::<u8>::None.to_bytes(), vec![0]);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0);
        assert!(u32::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        // declared length far beyond the buffer must fail before allocation
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3];
        assert!(Vec::<u8>::from_bytes(&bytes).is_err());
        assert!(String::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_invalid_bool_and_option() {
        assert!(bool::from_bytes(&[2]).is_err());
        assert!(Option::<u8>::from_bytes(&[9, 1]).is_err());
    }

    #[test]
    fn test_hash_256() {
        // sha256 of the empty string
        assert_eq!(
            hash_256([]).to_vec(),
            hex_to_vec("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
        );
    }

    fn hex_to_vec(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
