//! Object identifiers used when encoding CRLs.

/// id-ce-cRLNumber
pub const CRL_NUMBER: &[u64] = &[2, 5, 29, 20];
/// id-ce-deltaCRLIndicator
pub const DELTA_CRL_INDICATOR: &[u64] = &[2, 5, 29, 27];
/// id-ce-issuingDistributionPoint
pub const ISSUING_DISTRIBUTION_POINT: &[u64] = &[2, 5, 29, 28];
/// id-ce-authorityKeyIdentifier
pub const AUTHORITY_KEY_IDENTIFIER: &[u64] = &[2, 5, 29, 35];
/// id-ce-issuerAltName
pub const ISSUER_ALT_NAME: &[u64] = &[2, 5, 29, 18];
/// id-ce-freshestCRL
pub const FRESHEST_CRL: &[u64] = &[2, 5, 29, 46];

/// id-ce-cRLReasons
pub const CRL_REASON: &[u64] = &[2, 5, 29, 21];
/// id-ce-invalidityDate
pub const INVALIDITY_DATE: &[u64] = &[2, 5, 29, 24];
/// id-ce-holdInstructionCode
pub const HOLD_INSTRUCTION_CODE: &[u64] = &[2, 5, 29, 23];
/// id-ce-certificateIssuer
pub const CERTIFICATE_ISSUER: &[u64] = &[2, 5, 29, 29];

/// id-holdinstruction-none
pub const HOLD_INSTRUCTION_NONE: &[u64] = &[1, 2, 840, 10040, 2, 1];
/// id-holdinstruction-callissuer
pub const HOLD_INSTRUCTION_CALL_ISSUER: &[u64] = &[1, 2, 840, 10040, 2, 2];
/// id-holdinstruction-reject
pub const HOLD_INSTRUCTION_REJECT: &[u64] = &[1, 2, 840, 10040, 2, 3];

/// id-at-commonName
pub const COMMON_NAME: &[u64] = &[2, 5, 4, 3];

pub const SHA256_WITH_RSA: &[u64] = &[1, 2, 840, 113549, 1, 1, 11];
pub const SHA384_WITH_RSA: &[u64] = &[1, 2, 840, 113549, 1, 1, 12];
pub const SHA512_WITH_RSA: &[u64] = &[1, 2, 840, 113549, 1, 1, 13];
pub const ECDSA_WITH_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];
pub const ECDSA_WITH_SHA384: &[u64] = &[1, 2, 840, 10045, 4, 3, 3];
pub const ED25519: &[u64] = &[1, 3, 101, 112];

/// Renders an OID in dotted decimal form.
pub fn to_dotted(oid: &[u64]) -> String {
    oid.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Parses a dotted decimal OID.
pub fn parse_dotted(oid: &str) -> Option<Vec<u64>> {
    let arcs = oid
        .split('.')
        .map(|arc| arc.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    (arcs.len() >= 2).then_some(arcs)
}
