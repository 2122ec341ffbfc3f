//! CRL extensions (RFC 5280 §5.2).
//!
//! Extensions are configured as an ordered list. Each configured kind maps
//! to a builder function through [`CrlExtensionKind::builder`]; the order of
//! the configuration is the order of the extensions in every generated CRL.

use serde::{Deserialize, Serialize};
use tracing::warn;
use x509_parser::num_bigint::BigUint;
use yasna::{DERWriter, Tag};

use super::der::Extension;
use super::oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrlExtensionKind {
    AuthorityKeyIdentifier,
    IssuerAlternativeName,
    CrlNumber,
    DeltaCrlIndicator,
    IssuingDistributionPoint,
    FreshestCrl,
}

/// Describes the scope of a CRL for the issuing distribution point extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrlScope {
    UserCertsOnly,
    CaCertsOnly,
}

/// Configuration of a single CRL extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlExtensionConfig {
    #[serde(rename = "type")]
    pub kind: CrlExtensionKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub critical: bool,
    /// Distribution point URIs (issuing distribution point, freshest CRL,
    /// issuer alternative name).
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub scope: Option<CrlScope>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CrlExtensionConfig {
    pub fn new(kind: CrlExtensionKind) -> Self {
        Self {
            kind,
            enabled: true,
            critical: kind.required_criticality().unwrap_or(false),
            uris: Vec::new(),
            scope: None,
            dns_names: Vec::new(),
            emails: Vec::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_uris(mut self, uris: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uris = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope(mut self, scope: CrlScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// The criticality actually written, after the kind's own constraints.
    pub fn effective_criticality(&self) -> bool {
        self.kind.required_criticality().unwrap_or(self.critical)
    }
}

/// The issuing point state an extension may be derived from.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionContext<'a> {
    pub crl_number: &'a BigUint,
    /// The CRL number of the base CRL, set only when building a delta CRL.
    pub base_crl_number: Option<&'a BigUint>,
    pub key_identifier: Option<&'a [u8]>,
}

impl ExtensionContext<'_> {
    pub fn is_delta(&self) -> bool {
        self.base_crl_number.is_some()
    }
}

type BuildFn = fn(&CrlExtensionConfig, &ExtensionContext<'_>) -> Option<Vec<u8>>;

impl CrlExtensionKind {
    pub fn oid(self) -> &'static [u64] {
        match self {
            Self::AuthorityKeyIdentifier => oid::AUTHORITY_KEY_IDENTIFIER,
            Self::IssuerAlternativeName => oid::ISSUER_ALT_NAME,
            Self::CrlNumber => oid::CRL_NUMBER,
            Self::DeltaCrlIndicator => oid::DELTA_CRL_INDICATOR,
            Self::IssuingDistributionPoint => oid::ISSUING_DISTRIBUTION_POINT,
            Self::FreshestCrl => oid::FRESHEST_CRL,
        }
    }

    /// RFC 5280 fixes the criticality of some extensions regardless of configuration.
    pub fn required_criticality(self) -> Option<bool> {
        match self {
            Self::AuthorityKeyIdentifier | Self::CrlNumber | Self::FreshestCrl => Some(false),
            Self::DeltaCrlIndicator | Self::IssuingDistributionPoint => Some(true),
            Self::IssuerAlternativeName => None,
        }
    }

    fn builder(self) -> BuildFn {
        match self {
            Self::AuthorityKeyIdentifier => build_authority_key_identifier,
            Self::IssuerAlternativeName => build_issuer_alternative_name,
            Self::CrlNumber => build_crl_number,
            Self::DeltaCrlIndicator => build_delta_crl_indicator,
            Self::IssuingDistributionPoint => build_issuing_distribution_point,
            Self::FreshestCrl => build_freshest_crl,
        }
    }
}

fn build_authority_key_identifier(
    _config: &CrlExtensionConfig,
    ctx: &ExtensionContext<'_>,
) -> Option<Vec<u8>> {
    let Some(key_identifier) = ctx.key_identifier else {
        warn!("No CA key identifier available, omitting authority key identifier");
        return None;
    };
    Some(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            // keyIdentifier [0] IMPLICIT OCTET STRING
            writer
                .next()
                .write_tagged_implicit(Tag::context(0), |writer| writer.write_bytes(key_identifier));
        })
    }))
}

fn build_issuer_alternative_name(
    config: &CrlExtensionConfig,
    _ctx: &ExtensionContext<'_>,
) -> Option<Vec<u8>> {
    if config.uris.is_empty() && config.dns_names.is_empty() && config.emails.is_empty() {
        warn!("Issuer alternative name configured without any name, omitting it");
        return None;
    }
    Some(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            for email in &config.emails {
                // rfc822Name [1] IA5String
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(1), |writer| writer.write_ia5_string(email));
            }
            for dns in &config.dns_names {
                // dNSName [2] IA5String
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(2), |writer| writer.write_ia5_string(dns));
            }
            for uri in &config.uris {
                // uniformResourceIdentifier [6] IA5String
                writer
                    .next()
                    .write_tagged_implicit(Tag::context(6), |writer| writer.write_ia5_string(uri));
            }
        })
    }))
}

fn build_crl_number(_config: &CrlExtensionConfig, ctx: &ExtensionContext<'_>) -> Option<Vec<u8>> {
    Some(yasna::construct_der(|writer| {
        writer.write_bigint_bytes(&ctx.crl_number.to_bytes_be(), true)
    }))
}

fn build_delta_crl_indicator(
    _config: &CrlExtensionConfig,
    ctx: &ExtensionContext<'_>,
) -> Option<Vec<u8>> {
    let base = ctx.base_crl_number?;
    Some(yasna::construct_der(|writer| {
        writer.write_bigint_bytes(&base.to_bytes_be(), true)
    }))
}

fn build_issuing_distribution_point(
    config: &CrlExtensionConfig,
    _ctx: &ExtensionContext<'_>,
) -> Option<Vec<u8>> {
    Some(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            if !config.uris.is_empty() {
                write_distribution_point_name(writer.next(), &config.uris);
            }
            // at most one of onlyContainsUserCerts / onlyContainsCACerts
            if let Some(scope) = config.scope {
                let tag = match scope {
                    CrlScope::UserCertsOnly => Tag::context(1),
                    CrlScope::CaCertsOnly => Tag::context(2),
                };
                writer
                    .next()
                    .write_tagged_implicit(tag, |writer| writer.write_bool(true));
            }
        })
    }))
}

fn build_freshest_crl(config: &CrlExtensionConfig, ctx: &ExtensionContext<'_>) -> Option<Vec<u8>> {
    // a delta CRL never points at a fresher delta
    if ctx.is_delta() {
        return None;
    }
    if config.uris.is_empty() {
        warn!("Freshest CRL configured without URIs, omitting it");
        return None;
    }
    Some(yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_sequence(|writer| {
                write_distribution_point_name(writer.next(), &config.uris);
            });
        })
    }))
}

fn write_distribution_point_name(writer: DERWriter, uris: &[String]) {
    // distributionPoint [0] DistributionPointName (a CHOICE, hence explicit)
    writer.write_tagged(Tag::context(0), |writer| {
        // fullName [0] IMPLICIT GeneralNames
        writer.write_tagged_implicit(Tag::context(0), |writer| {
            writer.write_sequence(|writer| {
                for uri in uris {
                    writer
                        .next()
                        .write_tagged_implicit(Tag::context(6), |writer| writer.write_ia5_string(uri));
                }
            })
        })
    })
}

/// Produces the ordered CRL extension list for an issuing point.
#[derive(Debug, Clone)]
pub struct ExtensionBuilder {
    configs: Vec<CrlExtensionConfig>,
}

impl ExtensionBuilder {
    pub fn new(configs: Vec<CrlExtensionConfig>) -> Self {
        Self { configs }
    }

    pub fn is_enabled(&self, kind: CrlExtensionKind) -> bool {
        self.configs.iter().any(|c| c.kind == kind && c.enabled)
    }

    /// Delta CRLs are produced only when the delta CRL indicator is enabled.
    pub fn delta_enabled(&self) -> bool {
        self.is_enabled(CrlExtensionKind::DeltaCrlIndicator)
    }

    pub fn build(&self, ctx: &ExtensionContext<'_>) -> Vec<Extension> {
        self.configs
            .iter()
            .filter(|config| config.enabled)
            .filter_map(|config| {
                let build = config.kind.builder();
                build(config, ctx).map(|value| {
                    Extension::new(config.kind.oid(), config.effective_criticality(), value)
                })
            })
            .collect()
    }
}

impl Default for ExtensionBuilder {
    fn default() -> Self {
        Self::new(default_extensions())
    }
}

/// Authority key identifier and CRL number enabled, the rest present but disabled.
pub fn default_extensions() -> Vec<CrlExtensionConfig> {
    vec![
        CrlExtensionConfig::new(CrlExtensionKind::AuthorityKeyIdentifier),
        CrlExtensionConfig::new(CrlExtensionKind::IssuerAlternativeName).disabled(),
        CrlExtensionConfig::new(CrlExtensionKind::CrlNumber),
        CrlExtensionConfig::new(CrlExtensionKind::DeltaCrlIndicator).disabled(),
        CrlExtensionConfig::new(CrlExtensionKind::IssuingDistributionPoint).disabled(),
        CrlExtensionConfig::new(CrlExtensionKind::FreshestCrl).disabled(),
    ]
}
