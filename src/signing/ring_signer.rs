use std::sync::{Arc, PoisonError, RwLock};

use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_ASN1_SIGNING, ECDSA_P384_SHA384_ASN1_SIGNING, EcdsaKeyPair, Ed25519KeyPair,
    KeyPair, RSA_PKCS1_SHA256, RSA_PKCS1_SHA384, RSA_PKCS1_SHA512, RsaKeyPair,
};
use tracing::{debug, info, warn};

use super::{CrlSigner, SigningAlgorithm, SigningError};

enum SigningKey {
    Rsa(RsaKeyPair),
    EcdsaP256(EcdsaKeyPair),
    EcdsaP384(EcdsaKeyPair),
    Ed25519(Ed25519KeyPair),
}

impl SigningKey {
    fn from_pkcs8(pkcs8: &[u8], rng: &SystemRandom) -> Result<Self, SigningError> {
        if let Ok(key) = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8) {
            return Ok(Self::Ed25519(key));
        }
        if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, rng) {
            return Ok(Self::EcdsaP256(key));
        }
        if let Ok(key) = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, pkcs8, rng) {
            return Ok(Self::EcdsaP384(key));
        }
        RsaKeyPair::from_pkcs8(pkcs8)
            .map(Self::Rsa)
            .map_err(|e| SigningError::KeyRejected(e.to_string()))
    }

    fn default_algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Rsa(_) => SigningAlgorithm::Sha256WithRsa,
            Self::EcdsaP256(_) => SigningAlgorithm::Sha256WithEc,
            Self::EcdsaP384(_) => SigningAlgorithm::Sha384WithEc,
            Self::Ed25519(_) => SigningAlgorithm::Ed25519,
        }
    }

    fn supports(&self, algorithm: SigningAlgorithm) -> bool {
        match self {
            Self::Rsa(_) => matches!(
                algorithm,
                SigningAlgorithm::Sha256WithRsa
                    | SigningAlgorithm::Sha384WithRsa
                    | SigningAlgorithm::Sha512WithRsa
            ),
            Self::EcdsaP256(_) => algorithm == SigningAlgorithm::Sha256WithEc,
            Self::EcdsaP384(_) => algorithm == SigningAlgorithm::Sha384WithEc,
            Self::Ed25519(_) => algorithm == SigningAlgorithm::Ed25519,
        }
    }

    fn public_key(&self) -> Vec<u8> {
        match self {
            Self::Rsa(key) => key.public_key().as_ref().to_vec(),
            Self::EcdsaP256(key) | Self::EcdsaP384(key) => key.public_key().as_ref().to_vec(),
            Self::Ed25519(key) => key.public_key().as_ref().to_vec(),
        }
    }
}

/// Software signer backed by `ring`.
///
/// The key can be unloaded and reloaded at runtime, which is how a token
/// logout is modelled: signing while unloaded fails with
/// [`SigningError::KeyUnavailable`].
pub struct RingSigner {
    label: String,
    key: RwLock<Option<Arc<SigningKey>>>,
    rng: SystemRandom,
}

impl RingSigner {
    /// Loads a PKCS#8 (DER) private key. RSA, ECDSA P-256/P-384 and Ed25519 keys are accepted.
    pub fn from_pkcs8(label: impl Into<String>, pkcs8: &[u8]) -> Result<Self, SigningError> {
        let rng = SystemRandom::new();
        let key = SigningKey::from_pkcs8(pkcs8, &rng)?;
        let label = label.into();
        info!(
            "Loaded CRL signing key '{}' ({})",
            label,
            key.default_algorithm()
        );
        Ok(Self {
            label,
            key: RwLock::new(Some(Arc::new(key))),
            rng,
        })
    }

    /// Generates a fresh key for `algorithm` and returns it along with its PKCS#8 encoding.
    ///
    /// RSA keys cannot be generated this way.
    pub fn generate(
        label: impl Into<String>,
        algorithm: SigningAlgorithm,
    ) -> Result<(Self, Vec<u8>), SigningError> {
        let rng = SystemRandom::new();
        let document = match algorithm {
            SigningAlgorithm::Ed25519 => Ed25519KeyPair::generate_pkcs8(&rng),
            SigningAlgorithm::Sha256WithEc => {
                EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            }
            SigningAlgorithm::Sha384WithEc => {
                EcdsaKeyPair::generate_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, &rng)
            }
            other => return Err(SigningError::UnsupportedAlgorithm(other)),
        }
        .map_err(|_| SigningError::Failed("key generation failed".to_string()))?;

        let pkcs8 = document.as_ref().to_vec();
        let signer = Self::from_pkcs8(label, &pkcs8)?;
        Ok((signer, pkcs8))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Drops the key; further signing attempts fail until a key is loaded again.
    pub fn unload(&self) {
        warn!("Unloading CRL signing key '{}'", self.label);
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn load_pkcs8(&self, pkcs8: &[u8]) -> Result<(), SigningError> {
        let key = SigningKey::from_pkcs8(pkcs8, &self.rng)?;
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(key));
        info!("Reloaded CRL signing key '{}'", self.label);
        Ok(())
    }

    /// The raw public key, used to derive a key identifier when no CA certificate is at hand.
    pub fn public_key(&self) -> Option<Vec<u8>> {
        self.current().map(|key| key.public_key())
    }

    fn current(&self) -> Option<Arc<SigningKey>> {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_key(&self) -> Result<Arc<SigningKey>, SigningError> {
        self.current()
            .ok_or_else(|| SigningError::KeyUnavailable(self.label.clone()))
    }
}

impl CrlSigner for RingSigner {
    fn default_algorithm(&self) -> SigningAlgorithm {
        self.current()
            .map(|key| key.default_algorithm())
            .unwrap_or(SigningAlgorithm::Sha256WithRsa)
    }

    fn supports(&self, algorithm: SigningAlgorithm) -> bool {
        self.current().is_some_and(|key| key.supports(algorithm))
    }

    fn sign(&self, data: &[u8], algorithm: SigningAlgorithm) -> Result<Vec<u8>, SigningError> {
        let key = self.require_key()?;
        if !key.supports(algorithm) {
            return Err(SigningError::UnsupportedAlgorithm(algorithm));
        }
        debug!("Signing {} bytes with {}", data.len(), algorithm);

        let failed = |_: ring::error::Unspecified| SigningError::Failed(format!("{algorithm} signature failed"));
        match key.as_ref() {
            SigningKey::Rsa(key) => {
                let padding = match algorithm {
                    SigningAlgorithm::Sha384WithRsa => &RSA_PKCS1_SHA384,
                    SigningAlgorithm::Sha512WithRsa => &RSA_PKCS1_SHA512,
                    _ => &RSA_PKCS1_SHA256,
                };
                let mut signature = vec![0; key.public().modulus_len()];
                key.sign(padding, &self.rng, data, &mut signature)
                    .map_err(failed)?;
                Ok(signature)
            }
            SigningKey::EcdsaP256(key) | SigningKey::EcdsaP384(key) => key
                .sign(&self.rng, data)
                .map(|signature| signature.as_ref().to_vec())
                .map_err(failed),
            SigningKey::Ed25519(key) => Ok(key.sign(data).as_ref().to_vec()),
        }
    }
}
