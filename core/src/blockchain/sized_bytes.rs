use crate::formatting::prep_hex_str;
use blst::min_pk::{PublicKey, Signature};
use bytes::Buf;
use evg_serialize::Streamable;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Cursor, Error, ErrorKind, Read};
use std::str::FromStr;

/// Fixed-width byte string. Hashes, public keys and signatures are all
/// aliases of this; the wire form is the bare bytes with no length prefix.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteArray<const SIZE: usize> {
    bytes: [u8; SIZE],
}

impl<const SIZE: usize> ByteArray<SIZE> {
    pub const SIZE: usize = SIZE;

    pub fn new(bytes: impl Into<[u8; SIZE]>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Exact-length parse. Unlike a zero-padded conversion this rejects any
    /// slice that is not precisely `SIZE` bytes, so truncated hashes cannot
    /// alias each other.
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; SIZE] = slice.try_into().map_err(|_| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("expected {} bytes, got {}", SIZE, slice.len()),
            )
        })?;
        Ok(Self { bytes })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_sized_bytes(&self) -> [u8; SIZE] {
        self.bytes
    }

    pub fn is_null(&self) -> bool {
        self.bytes == [0u8; SIZE]
    }
}

impl<const SIZE: usize> Default for ByteArray<SIZE> {
    fn default() -> Self {
        Self { bytes: [0; SIZE] }
    }
}

impl<const SIZE: usize> AsRef<[u8]> for ByteArray<SIZE> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<const SIZE: usize> From<[u8; SIZE]> for ByteArray<SIZE> {
    fn from(bytes: [u8; SIZE]) -> Self {
        Self { bytes }
    }
}

impl<const SIZE: usize> From<ByteArray<SIZE>> for Vec<u8> {
    fn from(value: ByteArray<SIZE>) -> Vec<u8> {
        value.bytes.to_vec()
    }
}

impl<const SIZE: usize> TryFrom<&[u8]> for ByteArray<SIZE> {
    type Error = Error;
    fn try_from(slice: &[u8]) -> Result<Self, Error> {
        Self::parse(slice)
    }
}

impl<const SIZE: usize> TryFrom<&str> for ByteArray<SIZE> {
    type Error = Error;
    fn try_from(value: &str) -> Result<Self, Error> {
        let raw = hex::decode(prep_hex_str(value)).map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("{value} is not valid hex: {e}"),
            )
        })?;
        Self::parse(&raw)
    }
}

impl<const SIZE: usize> FromStr for ByteArray<SIZE> {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl<const SIZE: usize> fmt::Display for ByteArray<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.bytes))
    }
}

impl<const SIZE: usize> fmt::Debug for ByteArray<SIZE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.bytes))
    }
}

impl<const SIZE: usize> IntoIterator for ByteArray<SIZE> {
    type Item = u8;
    type IntoIter = core::array::IntoIter<u8, SIZE>;
    fn into_iter(self) -> Self::IntoIter {
        self.bytes.into_iter()
    }
}

impl<const SIZE: usize> Streamable for ByteArray<SIZE> {
    fn stream(&self, out: &mut Vec<u8>) {
        out.extend(self.bytes);
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if input.remaining() < SIZE {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("expected {SIZE} bytes, found {}", input.remaining()),
            ));
        }
        let mut bytes = [0u8; SIZE];
        input.read_exact(&mut bytes)?;
        Ok(Self { bytes })
    }
}

impl<const SIZE: usize> Serialize for ByteArray<SIZE> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct ByteArrayVisitor<const SIZE: usize>;

impl<const SIZE: usize> Visitor<'_> for ByteArrayVisitor<SIZE> {
    type Value = ByteArray<SIZE>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a hex string encoding {SIZE} bytes")
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Self::Value::try_from(value).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de, const SIZE: usize> Deserialize<'de> for ByteArray<SIZE> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ByteArrayVisitor)
    }
}

pub type Bytes4 = ByteArray<4>;
pub type Bytes8 = ByteArray<8>;
pub type Bytes32 = ByteArray<32>;
pub type Bytes48 = ByteArray<48>;
pub type Bytes96 = ByteArray<96>;
pub type Bytes100 = ByteArray<100>;

impl TryFrom<&Bytes48> for PublicKey {
    type Error = Error;
    fn try_from(value: &Bytes48) -> Result<PublicKey, Error> {
        PublicKey::from_bytes(value.as_slice())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid public key: {e:?}")))
    }
}

impl From<&PublicKey> for Bytes48 {
    fn from(value: &PublicKey) -> Bytes48 {
        Bytes48::new(value.to_bytes())
    }
}

impl TryFrom<&Bytes96> for Signature {
    type Error = Error;
    fn try_from(value: &Bytes96) -> Result<Signature, Error> {
        Signature::from_bytes(value.as_slice())
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid signature: {e:?}")))
    }
}

impl From<&Signature> for Bytes96 {
    fn from(value: &Signature) -> Bytes96 {
        Bytes96::new(value.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hash =
            Bytes32::try_from("0xccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb")
                .unwrap();
        assert_eq!(
            hash.to_string(),
            "0xccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
        );
        assert_eq!(Bytes32::try_from(hash.to_string().as_str()).unwrap(), hash);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Bytes32::try_from("0xabcd").is_err());
        assert!(Bytes32::parse(&[0u8; 31]).is_err());
        assert!(Bytes32::parse(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_streamable_is_bare_bytes() {
        let hash = Bytes32::new([7u8; 32]);
        assert_eq!(hash.to_bytes(), vec![7u8; 32]);
        assert_eq!(Bytes32::from_bytes(&hash.to_bytes()).unwrap(), hash);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        assert!(Bytes32::new(a) < Bytes32::new(b));
    }
}
