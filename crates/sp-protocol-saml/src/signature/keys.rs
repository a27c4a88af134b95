//! RSA primitives.
//!
//! SHA-2 variants go through aws-lc-rs. aws-lc-rs does not sign with SHA-1, so
//! that algorithm is handled with the `rsa` crate.

use aws_lc_rs::digest;
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{self, RsaKeyPair, UnparsedPublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use super::SignatureAlgorithm;
use crate::error::{SamlError, SamlResult};

/// Signs `data` with an RSA private key (PKCS#1 or PKCS#8 DER).
pub(crate) fn rsa_sign(
    key_der: &[u8],
    data: &[u8],
    algorithm: SignatureAlgorithm,
) -> SamlResult<Vec<u8>> {
    let padding: &'static dyn signature::RsaEncoding = match algorithm {
        SignatureAlgorithm::RsaSha1 => return rsa_sign_sha1(key_der, data),
        SignatureAlgorithm::RsaSha256 => &signature::RSA_PKCS1_SHA256,
        SignatureAlgorithm::RsaSha384 => &signature::RSA_PKCS1_SHA384,
        SignatureAlgorithm::RsaSha512 => &signature::RSA_PKCS1_SHA512,
    };

    let key_pair = RsaKeyPair::from_der(key_der)
        .or_else(|_| RsaKeyPair::from_pkcs8(key_der))
        .map_err(|e| SamlError::Crypto(format!("invalid RSA key: {e}")))?;

    let rng = SystemRandom::new();
    let mut sig = vec![0u8; key_pair.public_modulus_len()];
    key_pair
        .sign(padding, &rng, data, &mut sig)
        .map_err(|e| SamlError::Crypto(format!("RSA signing failed: {e}")))?;
    Ok(sig)
}

/// Verifies an RSA signature against a `SubjectPublicKeyInfo`.
pub(crate) fn rsa_verify(
    spki_der: &[u8],
    data: &[u8],
    sig: &[u8],
    algorithm: SignatureAlgorithm,
) -> bool {
    let verification_alg: &dyn signature::VerificationAlgorithm = match algorithm {
        SignatureAlgorithm::RsaSha1 => return rsa_verify_sha1(spki_der, data, sig),
        SignatureAlgorithm::RsaSha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        SignatureAlgorithm::RsaSha384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        SignatureAlgorithm::RsaSha512 => &signature::RSA_PKCS1_2048_8192_SHA512,
    };
    UnparsedPublicKey::new(verification_alg, spki_der)
        .verify(data, sig)
        .is_ok()
}

/// Digest used for `ds:DigestValue`.
pub(crate) fn message_digest(data: &[u8], algorithm: SignatureAlgorithm) -> Vec<u8> {
    let alg = match algorithm {
        SignatureAlgorithm::RsaSha1 => return Sha1::digest(data).to_vec(),
        SignatureAlgorithm::RsaSha256 => &digest::SHA256,
        SignatureAlgorithm::RsaSha384 => &digest::SHA384,
        SignatureAlgorithm::RsaSha512 => &digest::SHA512,
    };
    digest::digest(alg, data).as_ref().to_vec()
}

/// Extracts the `SubjectPublicKeyInfo` from a DER certificate.
pub(crate) fn public_key_from_cert(cert_der: &[u8]) -> SamlResult<Vec<u8>> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| SamlError::Crypto(format!("failed to parse certificate: {e}")))?;
    Ok(cert.public_key().raw.to_vec())
}

fn rsa_sign_sha1(key_der: &[u8], data: &[u8]) -> SamlResult<Vec<u8>> {
    let key = RsaPrivateKey::from_pkcs1_der(key_der)
        .or_else(|_| RsaPrivateKey::from_pkcs8_der(key_der))
        .map_err(|e| SamlError::Crypto(format!("invalid RSA key: {e}")))?;
    key.sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data))
        .map_err(|e| SamlError::Crypto(format!("RSA signing failed: {e}")))
}

fn rsa_verify_sha1(spki_der: &[u8], data: &[u8], sig: &[u8]) -> bool {
    let Ok(key) = RsaPublicKey::from_public_key_der(spki_der) else {
        return false;
    };
    key.verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), sig)
        .is_ok()
}
