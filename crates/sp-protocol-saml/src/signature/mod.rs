//! XML Signature support for SAML.
//!
//! Enveloped XML-DSig signatures on messages and assertions, and detached
//! signatures over the query string of the HTTP-Redirect binding.
//!
//! # Signing Algorithms
//!
//! - RSA-SHA1 (default for outgoing requests, for compatibility)
//! - RSA-SHA256
//! - RSA-SHA384 and RSA-SHA512 (verification of IdP signatures)
//!
//! Signed elements are digested in exclusive canonical form (see
//! [`crate::xml::Element::exclusive_canonical`]), with the namespaces they
//! inherit from the enclosing document.

mod keys;
mod signer;
mod validator;

pub use signer::*;
pub use validator::*;

use sp_core::RequestSignatureAlgorithm;

use crate::types::{digest_algorithms, signature_algorithms};

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-1.
    #[default]
    RsaSha1,
    /// RSA with SHA-256.
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => signature_algorithms::RSA_SHA1,
            Self::RsaSha256 => signature_algorithms::RSA_SHA256,
            Self::RsaSha384 => signature_algorithms::RSA_SHA384,
            Self::RsaSha512 => signature_algorithms::RSA_SHA512,
        }
    }

    /// Returns the corresponding digest algorithm URI.
    #[must_use]
    pub const fn digest_uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => digest_algorithms::SHA1,
            Self::RsaSha256 => digest_algorithms::SHA256,
            Self::RsaSha384 => digest_algorithms::SHA384,
            Self::RsaSha512 => digest_algorithms::SHA512,
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            signature_algorithms::RSA_SHA1 => Some(Self::RsaSha1),
            signature_algorithms::RSA_SHA256 => Some(Self::RsaSha256),
            signature_algorithms::RSA_SHA384 => Some(Self::RsaSha384),
            signature_algorithms::RSA_SHA512 => Some(Self::RsaSha512),
            _ => None,
        }
    }

    /// Returns the digest algorithm matching a digest URI.
    #[must_use]
    pub fn from_digest_uri(uri: &str) -> Option<Self> {
        match uri {
            digest_algorithms::SHA1 => Some(Self::RsaSha1),
            digest_algorithms::SHA256 => Some(Self::RsaSha256),
            digest_algorithms::SHA384 => Some(Self::RsaSha384),
            digest_algorithms::SHA512 => Some(Self::RsaSha512),
            _ => None,
        }
    }
}

impl From<RequestSignatureAlgorithm> for SignatureAlgorithm {
    fn from(alg: RequestSignatureAlgorithm) -> Self {
        match alg {
            RequestSignatureAlgorithm::Sha1 => Self::RsaSha1,
            RequestSignatureAlgorithm::Sha256 => Self::RsaSha256,
        }
    }
}

/// Extracts DER data from a PEM string.
pub(crate) fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    use base64::Engine;

    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem.find(&begin)? + begin.len();
    let end_pos = pem.find(&end)?;
    if end_pos < start {
        return None;
    }

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD.decode(b64_data).ok()
}

/// Certificate body as it appears in metadata and `ds:X509Certificate`.
pub(crate) fn certificate_body(pem: &str) -> Option<String> {
    use base64::Engine;

    pem_to_der(pem, "CERTIFICATE").map(|der| base64::engine::general_purpose::STANDARD.encode(der))
}
