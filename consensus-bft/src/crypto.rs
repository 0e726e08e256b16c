//! Signature verification capability.
//!
//! The state machine never touches key material directly for verification;
//! it goes through a [`SignatureVerifier`] so hosts can swap in batched or
//! hardware-backed verification.

use {solana_pubkey::Pubkey, solana_signature::Signature};

/// Verifies a signature over a message for a validator key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &Pubkey, message: &[u8], signature: &Signature) -> bool;
}

/// Ed25519 verification via `solana-signature`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, signer: &Pubkey, message: &[u8], signature: &Signature) -> bool {
        signature.verify(signer.as_ref(), message)
    }
}

/// Accepts every signature. For vote sets that were already verified on
/// admission into the vote cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreVerified;

impl SignatureVerifier for PreVerified {
    fn verify(&self, _signer: &Pubkey, _message: &[u8], _signature: &Signature) -> bool {
        true
    }
}
