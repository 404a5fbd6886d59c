//! MiMC Hash over the BN254 scalar field
//!
//! Every commitment, nullifier and tree node in the pool is produced by this
//! function, so it must agree bit-for-bit with the circuits and the on-chain
//! verifier.
//!
//! ```text
//!   H(b_0, .., b_{n-1}) = sponge(n, b_0, .., b_{n-1})
//!
//!   state_0     = 0
//!   state_{i+1} = E_0(state_i + x_i)        x = [n, b_0, .., b_{n-1}]
//!   E_k(x)      = (x + k + c_90)^7 ∘ .. ∘ (x + k + c_0)^7 + k
//! ```
//!
//! Inputs are 32-byte big-endian blocks. The arity is absorbed first so that
//! `H(a)` and `H(a, 0)` never collide. Blocks larger than the field modulus are
//! reduced; every value this crate feeds in (padded amounts, 31-byte nonces,
//! previous hash outputs) is already canonical.

use ark_bn254::Fr;
use ark_ff::{BigInteger, Field, PrimeField};

/// Number of MiMC rounds
const MIMC_ROUNDS: usize = 91;

/// Size of one hash input block and of the digest
pub const BLOCK_SIZE: usize = 32;

/// MiMC hasher with precomputed round constants
#[derive(Debug, Clone)]
pub struct MiMC {
    round_constants: Vec<Fr>,
}

impl Default for MiMC {
    fn default() -> Self {
        Self::new()
    }
}

impl MiMC {
    pub fn new() -> Self {
        let round_constants: Vec<Fr> = (0..MIMC_ROUNDS).map(Self::compute_round_constant).collect();

        Self { round_constants }
    }

    /// RC[i] = (i+1)^3 + (i+1)
    fn compute_round_constant(i: usize) -> Fr {
        let idx = Fr::from((i + 1) as u64);
        idx * idx * idx + idx
    }

    /// (x + k + c)^7
    fn round(&self, x: Fr, k: Fr, c: Fr) -> Fr {
        let t = x + k + c;
        let t2 = t.square();
        let t4 = t2.square();
        t4 * t2 * t
    }

    fn permute(&self, x: Fr, k: Fr) -> Fr {
        let mut state = x;
        for c in &self.round_constants {
            state = self.round(state, k, *c);
        }
        state + k
    }

    fn sponge_absorb(&self, inputs: impl IntoIterator<Item = Fr>) -> Fr {
        let zero = Fr::from(0u64);
        inputs
            .into_iter()
            .fold(zero, |state, input| self.permute(state + input, zero))
    }

    /// Hash field elements directly
    pub fn hash_fields(&self, inputs: &[Fr]) -> Fr {
        let domain = Fr::from(inputs.len() as u64);
        self.sponge_absorb(std::iter::once(domain).chain(inputs.iter().copied()))
    }

    /// Hash any number of 32-byte blocks
    pub fn hash(&self, blocks: &[[u8; BLOCK_SIZE]]) -> [u8; BLOCK_SIZE] {
        let fields: Vec<Fr> = blocks.iter().map(bytes_to_field_be).collect();
        field_to_bytes_be(self.hash_fields(&fields))
    }

    /// Hash a left/right pair of tree nodes
    pub fn hash_pair(&self, left: &[u8; BLOCK_SIZE], right: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        self.hash(&[*left, *right])
    }
}

/// Convert a field element to 32 bytes (big-endian)
pub fn field_to_bytes_be(f: Fr) -> [u8; BLOCK_SIZE] {
    let bytes = f.into_bigint().to_bytes_be();
    let mut arr = [0u8; BLOCK_SIZE];
    // right-aligned, so a short encoding keeps its leading zeros
    let offset = BLOCK_SIZE.saturating_sub(bytes.len());
    arr[offset..].copy_from_slice(&bytes[bytes.len().saturating_sub(BLOCK_SIZE)..]);
    arr
}

/// Convert 32 bytes to a field element (big-endian, reduced mod r)
pub fn bytes_to_field_be(bytes: &[u8; BLOCK_SIZE]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Reduce an arbitrary 32-byte value into its canonical field encoding
///
/// Used for public inputs such as the withdrawal recipient, whose raw bytes
/// may exceed the modulus.
pub fn reduce_to_field(bytes: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    field_to_bytes_be(bytes_to_field_be(bytes))
}

/// Whether `bytes` is already a canonical (fully reduced) field element
pub fn is_canonical(bytes: &[u8; BLOCK_SIZE]) -> bool {
    reduce_to_field(bytes) == *bytes
}
