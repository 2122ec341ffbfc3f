//! Certificate Revocation List encoding
//!
//! This module turns revocation state into RFC 5280 `CertificateList`
//! structures:
//! - DER encoding of the to-be-signed list and the signed envelope
//! - CRL extensions built from an ordered, configured registry
//! - CRL entry extensions filtered to the configured subset

pub mod der;
pub mod entry;
pub mod extensions;
pub mod oid;
mod reason;

pub use der::{Extension, RevokedEntry, TbsCertList, certificate_list};
pub use entry::{EntryExtensionFilter, EntryExtensionKind, StoredExtension, remove_from_crl_entry};
pub use extensions::{
    CrlExtensionConfig, CrlExtensionKind, CrlScope, ExtensionBuilder, ExtensionContext,
    default_extensions,
};
pub use reason::RevocationReason;
