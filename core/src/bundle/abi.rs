//! Argument encoding for calls into the pool contract.
//!
//! ```text
//! selector     = SHA-512/256(method signature)[..4]
//! byte[32][]   = u16 BE length ‖ element_0 ‖ … ‖ element_{n-1}
//! bool         = 0x80 | 0x00
//! uint64       = 8 bytes BE
//! return log   = RETURN_PREFIX ‖ u64 BE leaf index ‖ 32-byte root   (44 bytes)
//! ```

use sha2::{Digest, Sha512_256};
use thiserror::Error;

pub const DEPOSIT_METHOD: &str = "deposit(byte[32][],byte[32][],address)(uint64,byte[32])";
pub const WITHDRAW_METHOD: &str = "withdraw(byte[32][],byte[32][],account,bool,uint64)(uint64,byte[32])";
pub const NOOP_METHOD: &str = "noop(byte)void";

/// Marks a method's return value in the log stream
pub const RETURN_PREFIX: [u8; 4] = [0x15, 0x1f, 0x7c, 0x75];

pub const RETURN_LOG_LEN: usize = 4 + 8 + 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("array of {0} elements exceeds u16 length prefix")]
    TooLong(usize),
    #[error("byte[32][] payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("return log must be {RETURN_LOG_LEN} bytes, got {0}")]
    BadReturnLength(usize),
    #[error("return log does not start with the return prefix")]
    BadReturnPrefix,
}

pub fn method_selector(signature: &str) -> [u8; 4] {
    let digest = Sha512_256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

pub fn encode_byte32_array(items: &[[u8; 32]]) -> Result<Vec<u8>, AbiError> {
    let len = u16::try_from(items.len()).map_err(|_| AbiError::TooLong(items.len()))?;
    let mut out = Vec::with_capacity(2 + 32 * items.len());
    out.extend_from_slice(&len.to_be_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    Ok(out)
}

pub fn decode_byte32_array(bytes: &[u8]) -> Result<Vec<[u8; 32]>, AbiError> {
    if bytes.len() < 2 {
        return Err(AbiError::Truncated {
            expected: 2,
            actual: bytes.len(),
        });
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let expected = 2 + 32 * len;
    if bytes.len() != expected {
        return Err(AbiError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes[2..]
        .chunks_exact(32)
        .map(|chunk| {
            let mut item = [0u8; 32];
            item.copy_from_slice(chunk);
            item
        })
        .collect())
}

pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![if value { 0x80 } else { 0x00 }]
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn encode_return(leaf_index: u64, root: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RETURN_LOG_LEN);
    out.extend_from_slice(&RETURN_PREFIX);
    out.extend_from_slice(&leaf_index.to_be_bytes());
    out.extend_from_slice(root);
    out
}

/// Leaf index and new root from a (uint64, byte[32]) return log
pub fn decode_return(log: &[u8]) -> Result<(u64, [u8; 32]), AbiError> {
    if log.len() != RETURN_LOG_LEN {
        return Err(AbiError::BadReturnLength(log.len()));
    }
    if log[..4] != RETURN_PREFIX {
        return Err(AbiError::BadReturnPrefix);
    }
    let mut index = [0u8; 8];
    index.copy_from_slice(&log[4..12]);
    let mut root = [0u8; 32];
    root.copy_from_slice(&log[12..]);
    Ok((u64::from_be_bytes(index), root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_distinct() {
        let deposit = method_selector(DEPOSIT_METHOD);
        let withdraw = method_selector(WITHDRAW_METHOD);
        let noop = method_selector(NOOP_METHOD);
        assert_ne!(deposit, withdraw);
        assert_ne!(deposit, noop);
        assert_ne!(withdraw, noop);
        assert_eq!(deposit, method_selector(DEPOSIT_METHOD));
    }

    #[test]
    fn test_byte32_array_layout() {
        let encoded = encode_byte32_array(&[[1u8; 32], [2u8; 32]]).unwrap();
        assert_eq!(encoded.len(), 66);
        assert_eq!(&encoded[..2], &[0, 2]);
        assert_eq!(encoded[2], 1);
        assert_eq!(encoded[65], 2);
        assert_eq!(
            decode_byte32_array(&encoded).unwrap(),
            vec![[1u8; 32], [2u8; 32]]
        );
    }

    #[test]
    fn test_byte32_array_rejects_truncation() {
        let mut encoded = encode_byte32_array(&[[9u8; 32]]).unwrap();
        encoded.pop();
        assert_eq!(
            decode_byte32_array(&encoded),
            Err(AbiError::Truncated {
                expected: 34,
                actual: 33
            })
        );
    }

    #[test]
    fn test_return_log() {
        let log = encode_return(42, &[0xaa; 32]);
        assert_eq!(log.len(), RETURN_LOG_LEN);
        assert_eq!(decode_return(&log).unwrap(), (42, [0xaa; 32]));

        assert_eq!(
            decode_return(&log[..40]),
            Err(AbiError::BadReturnLength(40))
        );
        let mut bad = log.clone();
        bad[0] ^= 1;
        assert_eq!(decode_return(&bad), Err(AbiError::BadReturnPrefix));
    }
}
