/// Test support: the lock serializing tests that touch process-wide state,
/// and deterministic primitive doubles for wrapper plumbing tests.
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::aead::Aead;
use crate::error::{LoomError, Result};
use crate::mac::{ChunkedMac, ChunkedMacComputation, ChunkedMacVerification, Mac};
use crate::signature::{Signer, Verifier};

static REGISTRY_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

/// Serializes tests that mutate the registries or the FIPS flag. Take the
/// guard before calling any `reset()`.
pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
    REGISTRY_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MAC double: the tag is the instance label followed by the message.
/// Worthless as a MAC, ideal for asserting set and wrapper plumbing.
pub(crate) struct FakeMac {
    label: String,
}

impl FakeMac {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        FakeMac {
            label: label.into(),
        }
    }
}

impl Mac for FakeMac {
    fn compute_mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut tag = self.label.as_bytes().to_vec();
        tag.extend_from_slice(data);
        Ok(tag)
    }

    fn verify_mac(&self, tag: &[u8], data: &[u8]) -> Result<()> {
        if tag == self.compute_mac(data)?.as_slice() {
            Ok(())
        } else {
            Err(LoomError::VerificationFailed)
        }
    }
}

/// Chunked MAC double: behaves like [`FakeMac`] over the concatenation of
/// the updates.
pub(crate) struct FakeChunkedMac {
    label: String,
}

impl FakeChunkedMac {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        FakeChunkedMac {
            label: label.into(),
        }
    }
}

impl ChunkedMac for FakeChunkedMac {
    fn create_computation(&self) -> Result<Box<dyn ChunkedMacComputation>> {
        Ok(Box::new(FakeChunkedComputation {
            tag: self.label.as_bytes().to_vec(),
        }))
    }

    fn create_verification(&self, tag: &[u8]) -> Result<Box<dyn ChunkedMacVerification>> {
        Ok(Box::new(FakeChunkedVerification {
            expected: tag.to_vec(),
            seen: self.label.as_bytes().to_vec(),
        }))
    }
}

struct FakeChunkedComputation {
    tag: Vec<u8>,
}

impl ChunkedMacComputation for FakeChunkedComputation {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.tag.extend_from_slice(data);
        Ok(())
    }

    fn compute_mac(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.tag)
    }
}

struct FakeChunkedVerification {
    expected: Vec<u8>,
    seen: Vec<u8>,
}

impl ChunkedMacVerification for FakeChunkedVerification {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.seen.extend_from_slice(data);
        Ok(())
    }

    fn verify_mac(self: Box<Self>) -> Result<()> {
        if self.seen == self.expected {
            Ok(())
        } else {
            Err(LoomError::VerificationFailed)
        }
    }
}

/// AEAD double: the ciphertext is the label, the aad, then the plaintext
/// in the clear. Decryption checks the label and aad and hands the rest
/// back, so aad binding and entry selection stay observable.
pub(crate) struct FakeAead {
    label: String,
}

impl FakeAead {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        FakeAead {
            label: label.into(),
        }
    }
}

impl Aead for FakeAead {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut ciphertext = self.label.as_bytes().to_vec();
        ciphertext.extend_from_slice(aad);
        ciphertext.extend_from_slice(plaintext);
        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let header_len = self.label.len() + aad.len();
        if ciphertext.len() < header_len {
            return Err(LoomError::VerificationFailed);
        }
        let (header, plaintext) = ciphertext.split_at(header_len);
        if &header[..self.label.len()] != self.label.as_bytes()
            || &header[self.label.len()..] != aad
        {
            return Err(LoomError::VerificationFailed);
        }
        Ok(plaintext.to_vec())
    }
}

/// Signature doubles: the signature is the label followed by the message.
pub(crate) struct FakeSigner {
    label: String,
}

impl FakeSigner {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        FakeSigner {
            label: label.into(),
        }
    }
}

impl Signer for FakeSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signature = self.label.as_bytes().to_vec();
        signature.extend_from_slice(data);
        Ok(signature)
    }
}

pub(crate) struct FakeVerifier {
    label: String,
}

impl FakeVerifier {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        FakeVerifier {
            label: label.into(),
        }
    }
}

impl Verifier for FakeVerifier {
    fn verify(&self, signature: &[u8], data: &[u8]) -> Result<()> {
        let mut expected = self.label.as_bytes().to_vec();
        expected.extend_from_slice(data);
        if signature == expected.as_slice() {
            Ok(())
        } else {
            Err(LoomError::VerificationFailed)
        }
    }
}
