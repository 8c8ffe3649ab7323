use crate::blockchain::coin::Coin;
use crate::blockchain::coin_spend::CoinSpend;
use crate::blockchain::sized_bytes::{Bytes32, Bytes96};
use blst::min_pk::{AggregateSignature, Signature};
use evg_macros::Streamable;
use evg_serialize::{hash_256, Streamable};
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind};

#[derive(Streamable, Clone, PartialEq, Eq, Serialize, Deserialize, Debug, Default)]
pub struct SpendBundle {
    pub coin_spends: Vec<CoinSpend>,
    pub aggregated_signature: Bytes96,
}

impl SpendBundle {
    /// The bundle's identity: the digest of its canonical encoding.
    #[must_use]
    pub fn name(&self) -> Bytes32 {
        Bytes32::new(hash_256(self.to_bytes()))
    }

    pub fn removals(&self) -> Vec<Coin> {
        self.coin_spends.iter().map(|spend| spend.coin).collect()
    }

    pub fn removal_ids(&self) -> Vec<Bytes32> {
        self.coin_spends
            .iter()
            .map(|spend| spend.coin.coin_id())
            .collect()
    }

    /// Combines bundles into one, aggregating the BLS signatures. Used by
    /// block assembly; the spend order is the concatenation order.
    pub fn aggregate(bundles: &[SpendBundle]) -> Result<SpendBundle, Error> {
        let mut coin_spends = Vec::new();
        let mut signatures = Vec::new();
        for bundle in bundles {
            coin_spends.extend(bundle.coin_spends.iter().cloned());
            if bundle.aggregated_signature.is_null() {
                continue;
            }
            signatures.push(Signature::try_from(&bundle.aggregated_signature)?);
        }
        let aggregated_signature = match signatures.len() {
            0 => Bytes96::default(),
            _ => {
                let refs: Vec<&Signature> = signatures.iter().collect();
                let aggregate = AggregateSignature::aggregate(&refs, true).map_err(|e| {
                    Error::new(ErrorKind::InvalidInput, format!("aggregate failed: {e:?}"))
                })?;
                Bytes96::from(&aggregate.to_signature())
            }
        };
        Ok(SpendBundle {
            coin_spends,
            aggregated_signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::program::SerializedProgram;

    fn test_bundle(seed: u8) -> SpendBundle {
        SpendBundle {
            coin_spends: vec![CoinSpend {
                coin: Coin {
                    parent_coin_info: Bytes32::new([seed; 32]),
                    puzzle_hash: Bytes32::new([seed + 1; 32]),
                    amount: u64::from(seed) * 1000,
                },
                puzzle_reveal: SerializedProgram::new(vec![seed; 4]),
                solution: SerializedProgram::new(vec![seed; 2]),
            }],
            aggregated_signature: Bytes96::default(),
        }
    }

    #[test]
    fn test_name_commits_to_contents() {
        let a = test_bundle(1);
        let mut b = test_bundle(1);
        assert_eq!(a.name(), b.name());
        b.coin_spends[0].coin.amount += 1;
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_round_trip() {
        let bundle = test_bundle(3);
        let decoded = SpendBundle::from_bytes(&bundle.to_bytes()).unwrap();
        assert_eq!(decoded, bundle);
        assert_eq!(decoded.name(), bundle.name());
    }

    #[test]
    fn test_aggregate_concatenates_spends() {
        let merged = SpendBundle::aggregate(&[test_bundle(1), test_bundle(5)]).unwrap();
        assert_eq!(merged.coin_spends.len(), 2);
        assert_eq!(merged.removal_ids().len(), 2);
    }
}
