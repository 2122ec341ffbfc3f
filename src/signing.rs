//! CRL signing collaborator
//!
//! The issuing point only ever asks for a signature over the encoded
//! `tbsCertList`; key storage (software key, token, HSM) stays behind the
//! [`CrlSigner`] trait. Key lookup failures surface as
//! [`SigningError::KeyUnavailable`].

mod algorithm;
mod errors;
mod identity;
mod ring_signer;

pub use algorithm::SigningAlgorithm;
pub use errors::SigningError;
pub use identity::CaIdentity;
pub use ring_signer::RingSigner;

/// Signs encoded CRLs with a CA signing key.
pub trait CrlSigner: Send + Sync {
    /// The algorithm used when neither the request nor the configuration names one.
    fn default_algorithm(&self) -> SigningAlgorithm;

    /// Whether the key behind this signer can produce `algorithm` signatures.
    fn supports(&self, algorithm: SigningAlgorithm) -> bool;

    fn sign(&self, data: &[u8], algorithm: SigningAlgorithm) -> Result<Vec<u8>, SigningError>;
}
