//! Deterministic secp256r1 keys for tests.

use crate::{
    crypto::{HashSigner, HashVerifier},
    types::{BftNode, Digest, Signature},
};
use commonware_codec::DecodeExt;
use commonware_cryptography::{
    secp256r1::{self, PrivateKey, PublicKey},
    PrivateKeyExt as _, Signer as _, Verifier as _,
};

/// Namespace every consensus signature is made under.
const NAMESPACE: &[u8] = b"_CHAINBFT";

/// A secp256r1 key pair derived from a seed.
///
/// The encoded public key is the node identity.
#[derive(Clone)]
pub struct Keys {
    signer: PrivateKey,
    node: BftNode,
}

impl Keys {
    pub fn from_seed(seed: u64) -> Self {
        let signer = PrivateKey::from_seed(seed);
        let node = BftNode::from(signer.public_key().as_ref().to_vec());
        Self { signer, node }
    }

    pub fn node(&self) -> BftNode {
        self.node.clone()
    }
}

impl HashSigner for Keys {
    fn sign(&self, digest: &Digest) -> Signature {
        let signature = self.signer.sign(Some(NAMESPACE), digest.as_ref());
        Signature::from(signature.as_ref().to_vec())
    }
}

impl HashVerifier for Keys {
    fn verify(&self, node: &BftNode, digest: &Digest, signature: &Signature) -> bool {
        verify(node, digest, signature)
    }
}

/// [HashVerifier] for any node whose identity is an encoded secp256r1 public key.
#[derive(Clone, Copy, Debug, Default)]
pub struct Secp256r1Verifier;

impl HashVerifier for Secp256r1Verifier {
    fn verify(&self, node: &BftNode, digest: &Digest, signature: &Signature) -> bool {
        verify(node, digest, signature)
    }
}

fn verify(node: &BftNode, digest: &Digest, signature: &Signature) -> bool {
    let Ok(key) = PublicKey::decode(node.key()) else {
        return false;
    };
    let Ok(signature) = secp256r1::Signature::decode(signature.as_ref()) else {
        return false;
    };
    key.verify(Some(NAMESPACE), digest.as_ref(), &signature)
}
