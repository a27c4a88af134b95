//! HTTP-Redirect Binding implementation.
//!
//! Messages travel in URL query parameters with DEFLATE compression. A signed
//! message carries `SigAlg` and `Signature` parameters computed over
//! `SAMLRequest=..&RelayState=..&SigAlg=..` instead of an XML signature.

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sp_core::SamlBinding;
use std::io::{Read, Write};

use crate::error::{SamlError, SamlResult};
use crate::signature::XmlSigner;
use crate::types::MessageKind;

use super::{DecodedMessage, DetachedSignature};

/// Upper bound for an inflated message, against deflate bombs.
const MAX_INFLATED_LEN: u64 = 1024 * 1024;

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes a message into a redirect URL, signing the query when a signer
    /// is given.
    pub fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        kind: MessageKind,
        signer: Option<&XmlSigner>,
    ) -> SamlResult<String> {
        let compressed = deflate_compress(xml.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);

        let mut query = format!("{}={}", kind.param_name(), urlencoding::encode(&encoded));
        if let Some(rs) = relay_state {
            query.push_str(&format!("&RelayState={}", urlencoding::encode(rs)));
        }

        if let Some(signer) = signer {
            query.push_str(&format!(
                "&SigAlg={}",
                urlencoding::encode(signer.algorithm().uri())
            ));
            let signature = signer.sign_detached(query.as_bytes())?;
            query.push_str(&format!("&Signature={}", urlencoding::encode(&signature)));
        }

        let separator = if destination.contains('?') { '&' } else { '?' };
        Ok(format!("{destination}{separator}{query}"))
    }

    /// Decodes a message from the raw query string.
    ///
    /// The signed portion is taken from the query exactly as received, so the
    /// signature can be checked against the sender's own encoding.
    pub fn decode(query: &str) -> SamlResult<DecodedMessage> {
        let query = query.trim_start_matches('?');

        let mut message_part = None;
        let mut relay_part = None;
        let mut sig_alg_part = None;
        let mut signature = None;

        for part in query.split('&') {
            let Some((key, _)) = part.split_once('=') else {
                continue;
            };
            match key {
                "SAMLRequest" | "SAMLResponse" => message_part = Some(part),
                "RelayState" => relay_part = Some(part),
                "SigAlg" => sig_alg_part = Some(part),
                "Signature" => signature = Some(param_value(part)?),
                _ => {}
            }
        }

        let message_part = message_part.ok_or_else(|| {
            SamlError::MalformedMessage("no SAMLRequest or SAMLResponse parameter".to_string())
        })?;

        let compressed = base64::engine::general_purpose::STANDARD
            .decode(compact(&param_value(message_part)?))?;
        let xml_bytes = deflate_decompress(&compressed)?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| SamlError::MalformedMessage(format!("invalid UTF-8 in message: {e}")))?;

        let relay_state = relay_part.map(param_value).transpose()?;

        let detached_signature = match (signature, sig_alg_part) {
            (Some(signature), Some(sig_alg_part)) => {
                let mut signed_query = message_part.to_string();
                if let Some(rs) = relay_part {
                    signed_query.push('&');
                    signed_query.push_str(rs);
                }
                signed_query.push('&');
                signed_query.push_str(sig_alg_part);
                Some(DetachedSignature {
                    signed_query,
                    signature,
                    sig_alg: param_value(sig_alg_part)?,
                })
            }
            (None, None) => None,
            _ => {
                return Err(SamlError::MalformedMessage(
                    "Signature and SigAlg must be sent together".to_string(),
                ));
            }
        };

        Ok(DecodedMessage {
            xml,
            binding: SamlBinding::HttpRedirect,
            relay_state,
            detached_signature,
        })
    }
}

fn param_value(part: &str) -> SamlResult<String> {
    let raw = part.split_once('=').map_or("", |(_, v)| v);
    urlencoding::decode(&raw.replace('+', " "))
        .map(|v| v.into_owned())
        .map_err(|e| SamlError::MalformedMessage(format!("URL decode error: {e}")))
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Compresses data using DEFLATE (raw, no zlib header).
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SamlError::Internal(format!("compression error: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SamlError::Internal(format!("compression finish error: {e}")))
}

/// Decompresses DEFLATE data.
fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data).take(MAX_INFLATED_LEN);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SamlError::MalformedMessage(format!("inflate error: {e}")))?;
    Ok(decompressed)
}
