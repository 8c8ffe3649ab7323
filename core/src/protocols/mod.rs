pub mod error;
pub mod farmer;
pub mod full_node;
pub mod shared;
pub mod timelord;
pub mod wallet;

use crate::errors::ProtocolError;
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use crate::blockchain::sized_bytes::Bytes32;
use std::fmt;
use std::io::Error;

/// Fixed frame header: u32 length, u8 message type, u16 request id.
pub const FRAME_HEADER_SIZE: usize = 4 + 1 + 2;
/// Upper bound on a single frame's length field.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;
/// Request id carried by unsolicited messages.
pub const NO_REQUEST_ID: u16 = 0;

pub const INVALID_PROTOCOL_BAN_SECONDS: u64 = 10;
pub const API_EXCEPTION_BAN_SECONDS: u64 = 10;

/// Closed list of wire message kinds; the variant list is fixed per
/// protocol version and negotiated at handshake.
#[repr(u8)]
#[derive(Streamable, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolMessageTypes {
    //Shared protocol (all services)
    Handshake = 1,

    //Farmer protocol (farmer <-> full node)
    NewSignagePoint = 8,
    DeclareProofOfSpace = 9,
    RequestSignedValues = 10,
    SignedValues = 11,

    //Timelord protocol (timelord <-> full node)
    NewPeakTimelord = 13,
    NewUnfinishedBlockTimelord = 14,
    NewInfusionPointVdf = 15,
    NewSignagePointVdf = 16,
    NewEndOfSubSlotVdf = 17,

    //Full node protocol (full node <-> full node)
    NewPeak = 20,
    NewTransaction = 21,
    RequestTransaction = 22,
    RespondTransaction = 23,
    RequestProofOfWeight = 24,
    RespondProofOfWeight = 25,
    RequestBlock = 26,
    RespondBlock = 27,
    RejectBlock = 28,
    RequestBlocks = 29,
    RespondBlocks = 30,
    RejectBlocks = 31,
    NewUnfinishedBlock = 32,
    RequestUnfinishedBlock = 33,
    RespondUnfinishedBlock = 34,
    NewSignagePointOrEndOfSubSlot = 35,
    RequestSignagePointOrEndOfSubSlot = 36,
    RespondSignagePoint = 37,
    RespondEndOfSubSlot = 38,
    RequestMempoolTransactions = 39,
    RequestPeers = 43,
    RespondPeers = 44,

    //Wallet protocol (wallet <-> full node)
    SendTransaction = 48,
    TransactionAck = 49,
    NewPeakWallet = 50,
    RequestBlockHeader = 51,
    RespondBlockHeader = 52,
    RejectHeaderRequest = 53,
    CoinStateUpdate = 69,
    RegisterForPhUpdates = 70,
    RespondToPhUpdates = 71,
    RegisterForCoinUpdates = 72,
    RespondToCoinUpdates = 73,
}

impl TryFrom<u8> for ProtocolMessageTypes {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, ProtocolError> {
        use ProtocolMessageTypes::*;
        Ok(match byte {
            1 => Handshake,
            8 => NewSignagePoint,
            9 => DeclareProofOfSpace,
            10 => RequestSignedValues,
            11 => SignedValues,
            13 => NewPeakTimelord,
            14 => NewUnfinishedBlockTimelord,
            15 => NewInfusionPointVdf,
            16 => NewSignagePointVdf,
            17 => NewEndOfSubSlotVdf,
            20 => NewPeak,
            21 => NewTransaction,
            22 => RequestTransaction,
            23 => RespondTransaction,
            24 => RequestProofOfWeight,
            25 => RespondProofOfWeight,
            26 => RequestBlock,
            27 => RespondBlock,
            28 => RejectBlock,
            29 => RequestBlocks,
            30 => RespondBlocks,
            31 => RejectBlocks,
            32 => NewUnfinishedBlock,
            33 => RequestUnfinishedBlock,
            34 => RespondUnfinishedBlock,
            35 => NewSignagePointOrEndOfSubSlot,
            36 => RequestSignagePointOrEndOfSubSlot,
            37 => RespondSignagePoint,
            38 => RespondEndOfSubSlot,
            39 => RequestMempoolTransactions,
            43 => RequestPeers,
            44 => RespondPeers,
            48 => SendTransaction,
            49 => TransactionAck,
            50 => NewPeakWallet,
            51 => RequestBlockHeader,
            52 => RespondBlockHeader,
            53 => RejectHeaderRequest,
            69 => CoinStateUpdate,
            70 => RegisterForPhUpdates,
            71 => RespondToPhUpdates,
            72 => RegisterForCoinUpdates,
            73 => RespondToCoinUpdates,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for ProtocolMessageTypes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[repr(u8)]
#[derive(Streamable, Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeType {
    FullNode = 1,
    Farmer = 3,
    Timelord = 4,
    Wallet = 6,
}

/// A decoded frame body: one protocol message plus the request id tying
/// responses to requests (zero for unsolicited messages).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub msg_type: ProtocolMessageTypes,
    pub request_id: u16,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new<T: Streamable>(msg_type: ProtocolMessageTypes, request_id: u16, body: &T) -> Self {
        Message {
            msg_type,
            request_id,
            data: body.to_bytes(),
        }
    }

    /// Strictly decodes the payload as `T`; trailing bytes are an error.
    pub fn parse_as<T: Streamable>(&self) -> Result<T, Error> {
        T::from_bytes(&self.data)
    }

    /// Digest used for gossip de-duplication.
    pub fn digest(&self) -> Bytes32 {
        let mut buf = Vec::with_capacity(self.data.len() + 1);
        buf.push(self.msg_type as u8);
        buf.extend(&self.data);
        Bytes32::new(hash_256(buf))
    }

    /// Full wire frame: `(u32 length, u8 message_type, u16 request_id,
    /// payload)`, length covering everything after itself.
    pub fn frame(&self) -> Vec<u8> {
        let body_len = 1 + 2 + self.data.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend((body_len as u32).to_be_bytes());
        out.push(self.msg_type as u8);
        out.extend(self.request_id.to_be_bytes());
        out.extend(&self.data);
        out
    }

    /// Decodes a frame body (the bytes after the length word).
    pub fn decode(body: &[u8]) -> Result<Message, ProtocolError> {
        if body.len() < 3 {
            return Err(ProtocolError::FrameTooShort(body.len()));
        }
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        let msg_type = ProtocolMessageTypes::try_from(body[0])?;
        let request_id = u16::from_be_bytes([body[1], body[2]]);
        Ok(Message {
            msg_type,
            request_id,
            data: body[3..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::full_node::RequestBlock;

    #[test]
    fn test_frame_round_trip() {
        let msg = Message::new(
            ProtocolMessageTypes::RequestBlock,
            7,
            &RequestBlock {
                height: 42,
                include_transaction_block: true,
            },
        );
        let framed = msg.frame();
        let len = u32::from_be_bytes(framed[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, framed.len() - 4);
        let decoded = Message::decode(&framed[4..]).unwrap();
        assert_eq!(decoded, msg);
        let body: RequestBlock = decoded.parse_as().unwrap();
        assert_eq!(body.height, 42);
        assert!(body.include_transaction_block);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            Message::decode(&[200, 0, 0]),
            Err(ProtocolError::UnknownMessageType(200))
        ));
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(matches!(
            Message::decode(&[20, 0]),
            Err(ProtocolError::FrameTooShort(2))
        ));
    }

    #[test]
    fn test_digest_depends_on_type_and_payload() {
        let a = Message::new(ProtocolMessageTypes::RequestPeers, 0, &());
        let b = Message::new(ProtocolMessageTypes::RequestTransaction, 0, &());
        assert_ne!(a.digest(), b.digest());
    }
}
