use crate::blockchain::sized_bytes::{Bytes48, Bytes96};
use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use std::io::{Error, ErrorKind};

/// Augmented scheme: every message is prepended with the signing public
/// key, so the same message signed by two keys can never collide.
pub const AUG_SCHEME_DST: &[u8; 43] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_AUG_";

#[must_use]
pub fn verify_signature(public_key: &PublicKey, msg: &[u8], signature: &Signature) -> bool {
    matches!(
        signature.verify(
            true,
            msg,
            AUG_SCHEME_DST,
            &public_key.to_bytes(),
            public_key,
            true,
        ),
        BLST_ERROR::BLST_SUCCESS
    )
}

/// Verifies one aggregate signature over per-key messages. An empty pair
/// list verifies only against the null signature sentinel.
pub fn aggregate_verify_signature(
    pairs: &[(Bytes48, Vec<u8>)],
    signature: &Bytes96,
) -> Result<bool, Error> {
    if pairs.is_empty() {
        return Ok(signature.is_null());
    }
    let signature = Signature::try_from(signature)?;
    let mut keys = Vec::with_capacity(pairs.len());
    let mut augmented = Vec::with_capacity(pairs.len());
    for (key_bytes, msg) in pairs {
        let key = PublicKey::try_from(key_bytes)?;
        let mut combined = Vec::with_capacity(48 + msg.len());
        combined.extend(key_bytes.as_slice());
        combined.extend(msg);
        augmented.push(combined);
        keys.push(key);
    }
    let msg_refs: Vec<&[u8]> = augmented.iter().map(Vec::as_slice).collect();
    let key_refs: Vec<&PublicKey> = keys.iter().collect();
    Ok(matches!(
        signature.aggregate_verify(true, &msg_refs, AUG_SCHEME_DST, &key_refs, true),
        BLST_ERROR::BLST_SUCCESS
    ))
}

#[must_use]
pub fn sign(secret_key: &SecretKey, msg: &[u8]) -> Signature {
    secret_key.sign(msg, AUG_SCHEME_DST, &secret_key.sk_to_pk().to_bytes())
}

/// Signs on behalf of an aggregate or foreign key, prepending that key
/// instead of our own.
#[must_use]
pub fn sign_prepend(secret_key: &SecretKey, msg: &[u8], prepend_pk: &PublicKey) -> Signature {
    secret_key.sign(msg, AUG_SCHEME_DST, &prepend_pk.to_bytes())
}

pub fn secret_key_from_seed(seed: &[u8]) -> Result<SecretKey, Error> {
    SecretKey::key_gen(seed, &[])
        .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("key gen failed: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let sk = secret_key_from_seed(&[7u8; 32]).unwrap();
        let pk = sk.sk_to_pk();
        let signature = sign(&sk, b"evergreen");
        assert!(verify_signature(&pk, b"evergreen", &signature));
        assert!(!verify_signature(&pk, b"evergreep", &signature));
    }

    #[test]
    fn test_aggregate_verify() {
        use blst::min_pk::AggregateSignature;
        let sk_a = secret_key_from_seed(&[1u8; 32]).unwrap();
        let sk_b = secret_key_from_seed(&[2u8; 32]).unwrap();
        let sig_a = sign(&sk_a, b"one");
        let sig_b = sign(&sk_b, b"two");
        let aggregate = AggregateSignature::aggregate(&[&sig_a, &sig_b], true)
            .unwrap()
            .to_signature();
        let pairs = vec![
            (Bytes48::from(&sk_a.sk_to_pk()), b"one".to_vec()),
            (Bytes48::from(&sk_b.sk_to_pk()), b"two".to_vec()),
        ];
        assert!(aggregate_verify_signature(&pairs, &Bytes96::from(&aggregate)).unwrap());

        let wrong = vec![
            (Bytes48::from(&sk_a.sk_to_pk()), b"one".to_vec()),
            (Bytes48::from(&sk_b.sk_to_pk()), b"three".to_vec()),
        ];
        assert!(!aggregate_verify_signature(&wrong, &Bytes96::from(&aggregate)).unwrap());
    }

    #[test]
    fn test_empty_pairs_require_null_signature() {
        assert!(aggregate_verify_signature(&[], &Bytes96::default()).unwrap());
        let sk = secret_key_from_seed(&[3u8; 32]).unwrap();
        let signature = Bytes96::from(&sign(&sk, b"x"));
        assert!(!aggregate_verify_signature(&[], &signature).unwrap());
    }
}
