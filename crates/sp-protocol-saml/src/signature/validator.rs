//! XML Signature validation.
//!
//! Signatures are only checked against certificates taken from the identity
//! provider's metadata. A certificate embedded in the signature is never used
//! as a trust anchor.

use base64::Engine;

use super::keys::{message_digest, public_key_from_cert, rsa_verify};
use super::{pem_to_der, SignatureAlgorithm};
use crate::error::{SamlError, SamlResult};
use crate::types::{ENVELOPED_SIGNATURE, EXCLUSIVE_C14N, EXCLUSIVE_C14N_WITH_COMMENTS};
use crate::xml::Element;

/// XML signature validator.
#[derive(Debug, Clone)]
pub struct XmlSignatureValidator {
    /// `SubjectPublicKeyInfo` of every trusted certificate.
    trusted_keys: Vec<Vec<u8>>,
}

impl XmlSignatureValidator {
    /// Creates a validator from DER certificates.
    pub fn new(certificates_der: &[Vec<u8>]) -> SamlResult<Self> {
        let trusted_keys = certificates_der
            .iter()
            .map(|der| public_key_from_cert(der))
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self { trusted_keys })
    }

    /// Creates a validator from PEM certificates.
    pub fn from_pem(certificates_pem: &[String]) -> SamlResult<Self> {
        let ders = certificates_pem
            .iter()
            .map(|pem| {
                pem_to_der(pem, "CERTIFICATE")
                    .ok_or_else(|| SamlError::Configuration("invalid certificate PEM".to_string()))
            })
            .collect::<SamlResult<Vec<_>>>()?;
        Self::new(&ders)
    }

    /// Returns whether the element carries its own enveloped signature.
    #[must_use]
    pub fn is_signed(element: &Element) -> bool {
        element.child("Signature").is_some()
    }

    /// Verifies the enveloped signature of `signed`, an element of `document`.
    ///
    /// The signature must reference `signed` by ID, and the ID must occur only
    /// once in the document. `signed` has to be borrowed from `document` so that
    /// inherited namespace declarations can be found.
    pub fn verify_element(&self, document: &Element, signed: &Element) -> SamlResult<()> {
        let id = signed
            .attr("ID")
            .ok_or_else(|| SamlError::Signature("signed element has no ID".to_string()))?;
        if document.find_by_id(id).len() != 1 {
            return Err(SamlError::Signature(format!("ID '{id}' is not unique")));
        }

        let signature = signed
            .child("Signature")
            .ok_or_else(|| SamlError::Signature("element is not signed".to_string()))?;
        let signed_info = signature
            .child("SignedInfo")
            .ok_or_else(|| SamlError::Signature("no SignedInfo".to_string()))?;

        let algorithm = signed_info
            .child("SignatureMethod")
            .and_then(|m| m.attr("Algorithm"))
            .and_then(SignatureAlgorithm::from_uri)
            .ok_or_else(|| SamlError::Signature("unsupported signature algorithm".to_string()))?;

        let reference = signed_info
            .child("Reference")
            .ok_or_else(|| SamlError::Signature("no Reference".to_string()))?;
        if reference.attr("URI") != Some(format!("#{id}").as_str()) {
            return Err(SamlError::Signature(
                "signature does not reference the signed element".to_string(),
            ));
        }

        let digest_alg = reference
            .child("DigestMethod")
            .and_then(|m| m.attr("Algorithm"))
            .and_then(SignatureAlgorithm::from_digest_uri)
            .ok_or_else(|| SamlError::Signature("unsupported digest algorithm".to_string()))?;
        let expected_digest = compact(&reference.child_text("DigestValue").unwrap_or_default());

        let scope = document.namespaces_at(signed).ok_or_else(|| {
            SamlError::Signature("signed element is not part of the document".to_string())
        })?;
        let canonical = signed
            .without_signature()
            .exclusive_canonical(&scope, &reference_prefixes(reference)?)?;
        let calculated = message_digest(canonical.as_bytes(), digest_alg);
        if base64::engine::general_purpose::STANDARD.encode(calculated) != expected_digest {
            return Err(SamlError::Signature("digest value mismatch".to_string()));
        }

        let method = signed_info
            .child("CanonicalizationMethod")
            .ok_or_else(|| SamlError::Signature("no CanonicalizationMethod".to_string()))?;
        if !is_exclusive_c14n(method.attr("Algorithm")) {
            return Err(SamlError::Signature(format!(
                "unsupported canonicalization method {:?}",
                method.attr("Algorithm")
            )));
        }
        let signed_info_scope = document.namespaces_at(signed_info).ok_or_else(|| {
            SamlError::Signature("signed element is not part of the document".to_string())
        })?;
        let canonical_signed_info =
            signed_info.exclusive_canonical(&signed_info_scope, &inclusive_prefixes(method))?;

        let signature_value = base64::engine::general_purpose::STANDARD
            .decode(compact(&signature.child_text("SignatureValue").unwrap_or_default()))
            .map_err(|e| SamlError::Signature(format!("invalid signature encoding: {e}")))?;

        self.verify_with_any(canonical_signed_info.as_bytes(), &signature_value, algorithm)
    }

    /// Verifies a detached signature of the HTTP-Redirect binding.
    pub fn verify_detached(
        &self,
        signed_query: &str,
        signature_b64: &str,
        sig_alg: &str,
    ) -> SamlResult<()> {
        let algorithm = SignatureAlgorithm::from_uri(sig_alg).ok_or_else(|| {
            SamlError::Signature(format!("unknown signature algorithm: {sig_alg}"))
        })?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(compact(signature_b64))
            .map_err(|e| SamlError::Signature(format!("invalid signature encoding: {e}")))?;

        self.verify_with_any(signed_query.as_bytes(), &signature, algorithm)
    }

    fn verify_with_any(
        &self,
        data: &[u8],
        signature: &[u8],
        algorithm: SignatureAlgorithm,
    ) -> SamlResult<()> {
        if self.trusted_keys.is_empty() {
            return Err(SamlError::Signature("no trusted certificate".to_string()));
        }
        if self
            .trusted_keys
            .iter()
            .any(|key| rsa_verify(key, data, signature, algorithm))
        {
            Ok(())
        } else {
            Err(SamlError::Signature(
                "signature verification failed with all trusted certificates".to_string(),
            ))
        }
    }
}

/// Checks the reference transforms and returns the exclusive canonicalization
/// prefix list they carry.
fn reference_prefixes(reference: &Element) -> SamlResult<Vec<String>> {
    let mut prefixes = Vec::new();
    let Some(transforms) = reference.child("Transforms") else {
        return Ok(prefixes);
    };
    for transform in transforms.children_named("Transform") {
        match transform.attr("Algorithm") {
            Some(ENVELOPED_SIGNATURE) => {}
            algorithm if is_exclusive_c14n(algorithm) => prefixes = inclusive_prefixes(transform),
            other => {
                return Err(SamlError::Signature(format!(
                    "unsupported transform {other:?}"
                )));
            }
        }
    }
    Ok(prefixes)
}

fn inclusive_prefixes(method: &Element) -> Vec<String> {
    method
        .child("InclusiveNamespaces")
        .and_then(|n| n.attr("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

// Comments never reach the tree, so both variants canonicalize the same way.
fn is_exclusive_c14n(algorithm: Option<&str>) -> bool {
    matches!(
        algorithm,
        Some(EXCLUSIVE_C14N | EXCLUSIVE_C14N_WITH_COMMENTS)
    )
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::XmlSigner;

    const SP_KEY: &str = include_str!("../../../../tests/fixtures/sp.key");
    const SP_CERT: &str = include_str!("../../../../tests/fixtures/sp.crt");
    const IDP_KEY: &str = include_str!("../../../../tests/fixtures/idp.key");
    const IDP_CERT: &str = include_str!("../../../../tests/fixtures/idp.crt");

    const DOC: &str = r#"<samlp:Response ID="_r" Version="2.0"><saml:Issuer>https://idp</saml:Issuer><saml:Assertion ID="_a"><saml:Issuer>https://idp</saml:Issuer><saml:Subject>alice</saml:Subject></saml:Assertion></samlp:Response>"#;

    fn idp_validator() -> XmlSignatureValidator {
        XmlSignatureValidator::from_pem(&[IDP_CERT.to_string()]).unwrap()
    }

    #[test]
    fn nested_signatures_verify() {
        let signer = XmlSigner::from_pem(IDP_KEY, Some(IDP_CERT))
            .unwrap()
            .with_algorithm(SignatureAlgorithm::RsaSha256);
        let signed = signer.sign(DOC, "_a").unwrap();
        let signed = signer.sign(&signed, "_r").unwrap();

        let root = Element::parse(&signed).unwrap();
        let validator = idp_validator();
        validator.verify_element(&root, &root).unwrap();
        let assertion = root.child("Assertion").unwrap();
        assert!(XmlSignatureValidator::is_signed(assertion));
        validator.verify_element(&root, assertion).unwrap();
    }

    #[test]
    fn tampered_content_fails() {
        let signer = XmlSigner::from_pem(IDP_KEY, None).unwrap();
        let signed = signer.sign(DOC, "_a").unwrap().replace("alice", "mallory");

        let root = Element::parse(&signed).unwrap();
        let err = idp_validator()
            .verify_element(&root, root.child("Assertion").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn untrusted_key_fails_even_with_embedded_certificate() {
        let signer = XmlSigner::from_pem(SP_KEY, Some(SP_CERT)).unwrap();
        let signed = signer.sign(DOC, "_r").unwrap();

        let root = Element::parse(&signed).unwrap();
        assert!(matches!(
            idp_validator().verify_element(&root, &root),
            Err(SamlError::Signature(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let signer = XmlSigner::from_pem(IDP_KEY, None).unwrap();
        let signed = signer.sign(DOC, "_a").unwrap();
        let wrapped = signed.replace(
            "</samlp:Response>",
            "<saml:Assertion ID=\"_a\"><saml:Issuer>https://idp</saml:Issuer></saml:Assertion></samlp:Response>",
        );

        let root = Element::parse(&wrapped).unwrap();
        let err = idp_validator()
            .verify_element(&root, root.child("Assertion").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }

    #[test]
    fn externally_signed_response_verifies() {
        let xml = include_str!("../../../../tests/fixtures/idp_signed_response.xml");
        let root = Element::parse(xml).unwrap();
        let assertion = root.child("Assertion").unwrap();
        idp_validator().verify_element(&root, assertion).unwrap();

        let trimmed = Element::parse(&xml.replace("> alice <", ">alice<")).unwrap();
        let err = idp_validator()
            .verify_element(&trimmed, trimmed.child("Assertion").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("digest"));
    }

    #[test]
    fn signed_assertion_moved_out_of_its_response_still_verifies() {
        let doc = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r">
  <saml:Assertion Version="2.0" ID="_a">
    <saml:Issuer>https://idp</saml:Issuer>
    <saml:Subject><saml:NameID> alice </saml:NameID></saml:Subject>
  </saml:Assertion>
</samlp:Response>"#;
        let signed = XmlSigner::from_pem(IDP_KEY, None).unwrap().sign(doc, "_a").unwrap();

        let root = Element::parse(&signed).unwrap();
        let assertion = root.child("Assertion").unwrap();
        idp_validator().verify_element(&root, assertion).unwrap();

        // Re-rooted with its inherited declaration, the canonical form is unchanged.
        let copy = assertion.to_xml(&root.namespaces_at(assertion).unwrap());
        let standalone = Element::parse(&copy).unwrap();
        idp_validator().verify_element(&standalone, &standalone).unwrap();
    }

    #[test]
    fn unknown_transform_is_rejected() {
        let signed = XmlSigner::from_pem(IDP_KEY, None)
            .unwrap()
            .sign(DOC, "_a")
            .unwrap()
            .replace(crate::types::ENVELOPED_SIGNATURE, "urn:custom:transform");

        let root = Element::parse(&signed).unwrap();
        let err = idp_validator()
            .verify_element(&root, root.child("Assertion").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("unsupported transform"));
    }

    #[test]
    fn element_from_another_document_is_rejected() {
        let signed = XmlSigner::from_pem(IDP_KEY, None).unwrap().sign(DOC, "_r").unwrap();
        let root = Element::parse(&signed).unwrap();
        let other = Element::parse(&signed).unwrap();
        assert!(idp_validator().verify_element(&root, &other).is_err());
    }

    #[test]
    fn detached_signature() {
        let signer = XmlSigner::from_pem(IDP_KEY, None).unwrap();
        let query = "SAMLRequest=abc&SigAlg=x";
        let sig = signer.sign_detached(query.as_bytes()).unwrap();
        let alg = SignatureAlgorithm::RsaSha1.uri();

        idp_validator().verify_detached(query, &sig, alg).unwrap();
        assert!(idp_validator()
            .verify_detached("SAMLRequest=abd&SigAlg=x", &sig, alg)
            .is_err());
        assert!(idp_validator().verify_detached(query, &sig, "urn:unknown").is_err());
    }
}
