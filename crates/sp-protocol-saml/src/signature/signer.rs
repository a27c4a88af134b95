//! XML Signature creation.

use base64::Engine;
use sp_core::KeyMaterial;

use super::keys::{message_digest, rsa_sign};
use super::{pem_to_der, SignatureAlgorithm};
use crate::error::{SamlError, SamlResult};
use crate::types::{ENVELOPED_SIGNATURE, EXCLUSIVE_C14N, XMLDSIG_NS};
use crate::xml::{Element, Namespaces};

/// XML document signer.
///
/// Signs SAML documents with the service provider's private key.
#[derive(Clone)]
pub struct XmlSigner {
    private_key_der: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
    algorithm: SignatureAlgorithm,
}

impl std::fmt::Debug for XmlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlSigner")
            .field("algorithm", &self.algorithm)
            .field("has_certificate", &self.certificate_der.is_some())
            .finish_non_exhaustive()
    }
}

impl XmlSigner {
    /// Creates a signer from DER key material.
    #[must_use]
    pub fn new(private_key_der: Vec<u8>, certificate_der: Option<Vec<u8>>) -> Self {
        Self {
            private_key_der,
            certificate_der,
            algorithm: SignatureAlgorithm::default(),
        }
    }

    /// Creates a signer from PEM-encoded key and certificate.
    pub fn from_pem(private_key_pem: &str, certificate_pem: Option<&str>) -> SamlResult<Self> {
        let private_key_der = pem_to_der(private_key_pem, "PRIVATE KEY")
            .or_else(|| pem_to_der(private_key_pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| SamlError::Crypto("invalid private key PEM".to_string()))?;

        let certificate_der = certificate_pem.and_then(|pem| pem_to_der(pem, "CERTIFICATE"));

        Ok(Self::new(private_key_der, certificate_der))
    }

    /// Creates a signer from configured key material.
    pub fn from_key_material(keys: &KeyMaterial) -> SamlResult<Self> {
        let key = keys.private_key_pem()?;
        let cert = keys.certificate_pem().ok();
        Self::from_pem(&key, cert.as_deref())
    }

    /// Sets the signature algorithm.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The signature algorithm in use.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Signs the element with `ID="reference_id"` inside `xml`.
    ///
    /// The `ds:Signature` is inserted as the element's child right after its
    /// `Issuer`. Returns the signed document.
    pub fn sign(&self, xml: &str, reference_id: &str) -> SamlResult<String> {
        let root = Element::parse(xml)?;
        let targets = root.find_by_id(reference_id);
        let [target] = targets.as_slice() else {
            return Err(SamlError::Crypto(format!(
                "expected exactly one element with ID '{reference_id}'"
            )));
        };

        let scope = root
            .namespaces_at(target)
            .ok_or_else(|| SamlError::Crypto("signed element not found".to_string()))?;
        let canonical = target.without_signature().exclusive_canonical(&scope, &[])?;
        let digest = message_digest(canonical.as_bytes(), self.algorithm);
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);

        let signed_info = build_signed_info(reference_id, &digest_b64, self.algorithm);
        let canonical_signed_info =
            Element::parse(&signed_info)?.exclusive_canonical(&Namespaces::new(), &[])?;

        let signature_value = rsa_sign(
            &self.private_key_der,
            canonical_signed_info.as_bytes(),
            self.algorithm,
        )?;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature_value);

        let signature_element = build_signature_element(
            &signed_info,
            &signature_b64,
            self.certificate_der.as_deref(),
        );

        let position = insert_position(xml, reference_id)?;
        Ok(format!("{}{}{}", &xml[..position], signature_element, &xml[position..]))
    }

    /// Creates a detached base64 signature over `data`.
    ///
    /// Used for the query string of the HTTP-Redirect binding.
    pub fn sign_detached(&self, data: &[u8]) -> SamlResult<String> {
        let signature = rsa_sign(&self.private_key_der, data, self.algorithm)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(signature))
    }
}

/// Finds where the signature goes: after the Issuer of the referenced element,
/// or directly after its start tag when there is no Issuer.
fn insert_position(xml: &str, reference_id: &str) -> SamlResult<usize> {
    let id_pattern = format!(" ID=\"{reference_id}\"");
    let element_start = xml.find(&id_pattern).ok_or_else(|| {
        SamlError::Crypto(format!("element with ID '{reference_id}' not found"))
    })?;

    let tag_end = xml[element_start..]
        .find('>')
        .map(|pos| element_start + pos + 1)
        .ok_or_else(|| SamlError::Crypto("malformed XML element".to_string()))?;

    Ok(find_issuer_end(xml, tag_end).unwrap_or(tag_end))
}

fn find_issuer_end(xml: &str, after: usize) -> Option<usize> {
    let search_area = &xml[after..];
    if !search_area.starts_with("<saml:Issuer") && !search_area.starts_with("<Issuer") {
        return None;
    }
    ["</saml:Issuer>", "</Issuer>"]
        .iter()
        .find_map(|pattern| search_area.find(pattern).map(|pos| after + pos + pattern.len()))
}

fn build_signed_info(reference_id: &str, digest_b64: &str, algorithm: SignatureAlgorithm) -> String {
    format!(
        r##"<ds:SignedInfo xmlns:ds="{XMLDSIG_NS}"><ds:CanonicalizationMethod Algorithm="{EXCLUSIVE_C14N}"/><ds:SignatureMethod Algorithm="{}"/><ds:Reference URI="#{reference_id}"><ds:Transforms><ds:Transform Algorithm="{ENVELOPED_SIGNATURE}"/><ds:Transform Algorithm="{EXCLUSIVE_C14N}"/></ds:Transforms><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{digest_b64}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
        algorithm.uri(),
        algorithm.digest_uri(),
    )
}

fn build_signature_element(
    signed_info: &str,
    signature_value: &str,
    certificate_der: Option<&[u8]>,
) -> String {
    let mut signature = format!(
        r#"<ds:Signature xmlns:ds="{XMLDSIG_NS}">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue>"#
    );

    if let Some(cert) = certificate_der {
        let cert_b64 = base64::engine::general_purpose::STANDARD.encode(cert);
        signature.push_str(&format!(
            "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"
        ));
    }

    signature.push_str("</ds:Signature>");
    signature
}
