use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use wincode::{SchemaRead, SchemaWrite};

use super::BundleError;
use crate::ledger::Address;

/// What an operation does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub enum OperationKind {
    /// Call into the pool contract
    ProtocolCall {
        app_id: u64,
        args: Vec<Vec<u8>>,
        /// Extra accounts the call may read or pay out to
        accounts: Vec<Address>,
        /// Contract storage boxes the call may touch
        boxes: Vec<Vec<u8>>,
    },
    /// Plain value transfer
    Payment { receiver: Address, amount: u64 },
}

/// One ledger operation. Canonical bytes are its wincode encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct Operation {
    pub sender: Address,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    /// Group id, zero until the bundle is finalized
    pub group: [u8; 32],
    pub kind: OperationKind,
}

impl Operation {
    pub fn bytes(&self) -> Result<Vec<u8>, BundleError> {
        wincode::serialize(self).map_err(|e| BundleError::Encoding(e.to_string()))
    }

    /// SHA-512/256("TX" ‖ canonical bytes)
    pub fn id(&self) -> Result<OperationId, BundleError> {
        let bytes = self.bytes()?;
        let mut hasher = Sha512_256::new();
        hasher.update(b"TX");
        hasher.update(&bytes);
        Ok(OperationId(hasher.finalize().into()))
    }

    pub fn is_payment(&self) -> bool {
        matches!(self.kind, OperationKind::Payment { .. })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(#[serde(with = "hex::serde")] pub [u8; 32]);

impl OperationId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.to_hex())
    }
}

/// Digest over the ordered operation ids of a finalized bundle
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(#[serde(with = "hex::serde")] pub [u8; 32]);

impl GroupId {
    /// SHA-512/256("TG" ‖ id_0 ‖ … ‖ id_n), over operations whose group
    /// field is still zero
    pub fn compute(operations: &[Operation]) -> Result<Self, BundleError> {
        let mut hasher = Sha512_256::new();
        hasher.update(b"TG");
        for op in operations {
            let mut unstamped = op.clone();
            unstamped.group = [0u8; 32];
            hasher.update(unstamped.id()?.0);
        }
        Ok(Self(hasher.finalize().into()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.to_hex())
    }
}

impl FromStr for GroupId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut out)?;
        Ok(Self(out))
    }
}

/// An operation with the sender's signature over its canonical bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct SignedOperation {
    pub operation: Operation,
    pub signature: Vec<u8>,
}

impl SignedOperation {
    pub fn sign(operation: Operation, key: &SigningKey) -> Result<Self, BundleError> {
        let msg = operation.bytes()?;
        let signature = key.sign(&msg).to_bytes().to_vec();
        Ok(Self {
            operation,
            signature,
        })
    }

    /// Whether the signature is valid for the operation's sender
    pub fn verify(&self) -> bool {
        let Ok(vk) = self.operation.sender.verifying_key() else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&self.signature) else {
            return false;
        };
        let Ok(msg) = self.operation.bytes() else {
            return false;
        };
        vk.verify(&msg, &sig).is_ok()
    }
}

/// The wire form handed to `LedgerClient::submit_bundle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct SignedBundle {
    pub operations: Vec<SignedOperation>,
}

impl SignedBundle {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> {
        wincode::serialize(self).map_err(|e| BundleError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        wincode::deserialize(bytes).map_err(|e| BundleError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(sender: Address, amount: u64) -> Operation {
        Operation {
            sender,
            fee: 1000,
            first_valid: 10,
            last_valid: 20,
            group: [0u8; 32],
            kind: OperationKind::Payment {
                receiver: Address([2; 32]),
                amount,
            },
        }
    }

    #[test]
    fn test_operation_id_changes_with_contents() {
        let a = payment(Address([1; 32]), 5);
        let b = payment(Address([1; 32]), 6);
        assert_eq!(a.id().unwrap(), a.clone().id().unwrap());
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_group_id_ignores_stamp_and_respects_order() {
        let a = payment(Address([1; 32]), 5);
        let b = payment(Address([1; 32]), 6);
        let group = GroupId::compute(&[a.clone(), b.clone()]).unwrap();

        let mut stamped = a.clone();
        stamped.group = group.0;
        assert_eq!(GroupId::compute(&[stamped, b.clone()]).unwrap(), group);
        assert_ne!(GroupId::compute(&[b, a]).unwrap(), group);
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let sender = Address::from_verifying_key(&key.verifying_key());
        let signed = SignedOperation::sign(payment(sender, 100), &key).unwrap();
        assert!(signed.verify());

        let mut tampered = signed.clone();
        if let OperationKind::Payment { amount, .. } = &mut tampered.operation.kind {
            *amount = 101;
        }
        assert!(!tampered.verify());
    }

    #[test]
    fn test_signature_from_wrong_key_fails() {
        let key = SigningKey::from_bytes(&[3u8; 32]);
        let other = SigningKey::from_bytes(&[4u8; 32]);
        let sender = Address::from_verifying_key(&key.verifying_key());
        let signed = SignedOperation::sign(payment(sender, 100), &other).unwrap();
        assert!(!signed.verify());
    }

    #[test]
    fn test_group_id_hex_parse() {
        let id = GroupId([0x5a; 32]);
        assert_eq!(id.to_hex().parse::<GroupId>().unwrap(), id);
        assert!("zz".parse::<GroupId>().is_err());
    }
}
