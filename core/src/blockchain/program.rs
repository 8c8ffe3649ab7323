use crate::blockchain::sized_bytes::Bytes32;
use crate::formatting::prep_hex_str;
use evg_serialize::{hash_256, Streamable};
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{Cursor, Error, ErrorKind};

/// Opaque serialized program. The node never evaluates these itself; it
/// hands them to the external evaluator and treats the digest of the bytes
/// as the puzzle-hash commitment.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SerializedProgram(Vec<u8>);

impl SerializedProgram {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(&self.0))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SerializedProgram {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for SerializedProgram {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Streamable for SerializedProgram {
    fn stream(&self, out: &mut Vec<u8>) {
        self.0.stream(out);
    }
    fn parse(input: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self(Vec::<u8>::parse(input)?))
    }
}

impl fmt::Display for SerializedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for SerializedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializedProgram({} bytes)", self.0.len())
    }
}

impl Serialize for SerializedProgram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

struct SerializedProgramVisitor;

impl Visitor<'_> for SerializedProgramVisitor {
    type Value = SerializedProgram;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a hex string")
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
        hex::decode(prep_hex_str(value))
            .map(SerializedProgram)
            .map_err(|e| E::custom(Error::new(ErrorKind::InvalidInput, e.to_string()).to_string()))
    }
}

impl<'de> Deserialize<'de> for SerializedProgram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SerializedProgramVisitor)
    }
}
