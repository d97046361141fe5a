use thiserror::Error;
use x509_parser::{
    certificate::X509Certificate,
    pem::Pem,
    prelude::FromDer,
    x509::X509Name,
};

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// The fields of a certificate that end up in metric labels and values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCertificate {
    /// Issuer common name, empty when the issuer has none
    pub issuer: String,
    /// Subject common name, empty when the subject has none
    pub cn: String,
    /// Expiration as seconds since the unix epoch
    pub not_after: i64,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed PEM block: {0}")]
    Pem(String),

    #[error("failed to parse certificate: {0}")]
    Certificate(String),

    #[error("no certificate found in data")]
    NoCertificate,

    #[error("data is neither PEM nor DER; encrypted containers are not supported")]
    EncryptedContainer,
}

/// Decode every certificate contained in `data`
///
/// PEM input may hold several blocks; each `CERTIFICATE` block yields one
/// entry and other blocks (keys, CSRs) are skipped. Anything else is parsed as
/// a single DER certificate. `password` is only consulted to report a better
/// error for opaque, encrypted payloads.
///
/// # Errors
///
/// Returns an error if no certificate could be decoded
pub fn decode_certificates(
    data: &[u8],
    password: &str,
) -> Result<Vec<DecodedCertificate>, DecodeError> {
    if contains_pem(data) {
        return decode_pem_bundle(data);
    }

    match X509Certificate::from_der(data) {
        Ok((_, cert)) => Ok(vec![describe(&cert)]),
        Err(_) if !password.is_empty() => Err(DecodeError::EncryptedContainer),
        Err(e) => Err(DecodeError::Certificate(e.to_string())),
    }
}

fn contains_pem(data: &[u8]) -> bool {
    data.windows(PEM_MARKER.len())
        .any(|window| window == PEM_MARKER)
}

fn decode_pem_bundle(data: &[u8]) -> Result<Vec<DecodedCertificate>, DecodeError> {
    let mut certificates = Vec::new();

    for block in Pem::iter_from_buffer(data) {
        let block = block.map_err(|e| DecodeError::Pem(e.to_string()))?;
        if block.label != "CERTIFICATE" {
            continue;
        }

        let cert = block
            .parse_x509()
            .map_err(|e| DecodeError::Certificate(e.to_string()))?;
        certificates.push(describe(&cert));
    }

    if certificates.is_empty() {
        return Err(DecodeError::NoCertificate);
    }

    Ok(certificates)
}

fn describe(cert: &X509Certificate<'_>) -> DecodedCertificate {
    DecodedCertificate {
        issuer: common_name(cert.issuer()),
        cn: common_name(cert.subject()),
        not_after: cert.validity().not_after.timestamp(),
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}
