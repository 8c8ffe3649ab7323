use crate::blockchain::sized_bytes::{Bytes100, Bytes32};
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};

/// Class group element, the output form of the verifiable delay function.
#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct ClassgroupElement {
    pub data: Bytes100,
}

impl ClassgroupElement {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.data.as_slice()))
    }
}

#[derive(Streamable, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct VdfInfo {
    pub challenge: Bytes32,
    pub output: ClassgroupElement,
    pub number_of_iterations: u64,
}

impl VdfInfo {
    pub fn get_hash(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }
}

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct VdfProof {
    pub witness_type: u8,
    pub witness: Vec<u8>,
    pub normalized_to_identity: bool,
}
