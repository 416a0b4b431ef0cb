//! Hashing and signing services consumed by the consensus core.
//!
//! The core never inspects keys or signatures. It hashes canonical encodings of consensus
//! objects with a [Hasher] and hands the resulting [Digest] to a [HashSigner] or
//! [HashVerifier].

use crate::{
    metrics::SystemCounters,
    types::{BftNode, Digest, Signature, DIGEST_LENGTH},
};
use commonware_codec::Encode;
use commonware_cryptography::{Hasher as _, Sha256};

/// Produces a [Digest] over raw bytes.
pub trait Hasher: Send + Sync {
    fn hash_bytes(&self, bytes: &[u8]) -> Digest;
}

/// Hashing of canonical encodings, available on every [Hasher].
pub trait HasherExt: Hasher {
    /// Hash the canonical encoding of a value.
    fn hash<T: Encode>(&self, value: &T) -> Digest {
        self.hash_bytes(&value.encode())
    }
}

impl<H: Hasher + ?Sized> HasherExt for H {}

/// SHA-256 [Hasher].
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn hash_bytes(&self, bytes: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; DIGEST_LENGTH];
        out.copy_from_slice(digest.as_ref());
        Digest::new(out)
    }
}

/// Signs digests on behalf of the local node.
pub trait HashSigner {
    fn sign(&self, digest: &Digest) -> Signature;
}

/// Verifies signatures produced by a [HashSigner].
pub trait HashVerifier {
    fn verify(&self, node: &BftNode, digest: &Digest, signature: &Signature) -> bool;
}

/// [HashSigner] that records every signature it produces. Clones share counters.
#[derive(Clone)]
pub struct CountingSigner<S> {
    inner: S,
    counters: SystemCounters,
}

impl<S: HashSigner> CountingSigner<S> {
    pub fn new(inner: S, counters: SystemCounters) -> Self {
        Self { inner, counters }
    }
}

impl<S: HashSigner> HashSigner for CountingSigner<S> {
    fn sign(&self, digest: &Digest) -> Signature {
        self.counters.signatures_signed.inc();
        self.inner.sign(digest)
    }
}

/// [HashVerifier] that records every verification it performs.
pub struct CountingVerifier<V> {
    inner: V,
    counters: SystemCounters,
}

impl<V: HashVerifier> CountingVerifier<V> {
    pub fn new(inner: V, counters: SystemCounters) -> Self {
        Self { inner, counters }
    }
}

impl<V: HashVerifier> HashVerifier for CountingVerifier<V> {
    fn verify(&self, node: &BftNode, digest: &Digest, signature: &Signature) -> bool {
        self.counters.signatures_verified.inc();
        self.inner.verify(node, digest, signature)
    }
}

impl<T: HashSigner + ?Sized> HashSigner for Box<T> {
    fn sign(&self, digest: &Digest) -> Signature {
        (**self).sign(digest)
    }
}

impl<T: HashVerifier + ?Sized> HashVerifier for Box<T> {
    fn verify(&self, node: &BftNode, digest: &Digest, signature: &Signature) -> bool {
        (**self).verify(node, digest, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::registry::Registry;

    struct Echo;

    impl HashSigner for Echo {
        fn sign(&self, digest: &Digest) -> Signature {
            Signature::from(digest.as_ref().to_vec())
        }
    }

    impl HashVerifier for Echo {
        fn verify(&self, _: &BftNode, digest: &Digest, signature: &Signature) -> bool {
            signature.as_ref() == digest.as_ref()
        }
    }

    #[test]
    fn sha256_hasher_is_deterministic() {
        let hasher = Sha256Hasher;
        assert_eq!(hasher.hash(&7u64), hasher.hash(&7u64));
        assert_ne!(hasher.hash(&7u64), hasher.hash(&8u64));
        assert_eq!(hasher.hash(&7u64), hasher.hash_bytes(&7u64.to_be_bytes()));

        // SHA-256 of the empty string
        assert_eq!(
            format!("{:?}", hasher.hash_bytes(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hasher_ext_works_through_trait_objects() {
        let hasher: Box<dyn Hasher> = Box::new(Sha256Hasher);
        assert_eq!(hasher.hash(&7u64), Sha256Hasher.hash(&7u64));
    }

    #[test]
    fn option_encoding_distinguishes_none() {
        let hasher = Sha256Hasher;
        assert_ne!(hasher.hash(&Some(0u64)), hasher.hash(&None::<u64>));
    }

    #[test]
    fn counting_wrappers_increment_counters() {
        let counters = SystemCounters::new(&mut Registry::default());
        let signer = CountingSigner::new(Echo, counters.clone());
        let verifier = CountingVerifier::new(Echo, counters.clone());
        let digest = Sha256Hasher.hash(&1u64);
        let signature = signer.sign(&digest);
        assert!(verifier.verify(&BftNode::from(vec![1]), &digest, &signature));
        assert!(verifier.verify(&BftNode::from(vec![1]), &digest, &signature));
        assert_eq!(counters.signatures_signed.get(), 1);
        assert_eq!(counters.signatures_verified.get(), 2);
    }
}
