//! Verification of inbound service tokens.
//!
//! Feed requests arrive with a short-lived JWT signed by the caller's repo
//! signing key. The issuer DID is resolved to its published key and the
//! ES256K/ES256 signature checked over the token's signing input.

use anyhow::{anyhow, bail, Context, Result};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

const PLC_DIRECTORY: &str = "https://plc.directory";

/// Multicodec prefix of a compressed secp256k1 public key.
const MULTICODEC_SECP256K1: [u8; 2] = [0xe7, 0x01];
/// Multicodec prefix of a compressed NIST P-256 public key.
const MULTICODEC_P256: [u8; 2] = [0x80, 0x24];

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    iss: String,
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default, rename = "verificationMethod")]
    verification_method: Vec<VerificationMethod>,
}

#[derive(Debug, Deserialize)]
struct VerificationMethod {
    id: String,
    #[serde(default, rename = "publicKeyMultibase")]
    public_key_multibase: Option<String>,
}

enum PublicKey {
    Secp256k1(Vec<u8>),
    P256(Vec<u8>),
}

pub struct ServiceAuth {
    http: reqwest::Client,
}

impl ServiceAuth {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("build identity HTTP client"),
        }
    }

    /// Verify the request's bearer token and return the caller's DID.
    pub async fn request_user_did(&self, headers: &HeaderMap) -> Result<String> {
        let token = bearer_token(headers)?;
        let (signing_input, header, claims, signature) = split_token(token)?;

        check_expiry(&claims)?;

        let key = self.resolve_signing_key(&claims.iss).await?;
        verify_signature(&header.alg, &key, signing_input.as_bytes(), &signature)?;

        Ok(claims.iss)
    }

    /// Resolve a DID to the repo signing key published in its DID document.
    async fn resolve_signing_key(&self, did: &str) -> Result<PublicKey> {
        let url = did_doc_url(did)?;
        let doc: DidDocument = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("unable to resolve did {did}"))?
            .error_for_status()
            .with_context(|| format!("unable to resolve did {did}"))?
            .json()
            .await
            .with_context(|| format!("malformed DID document for {did}"))?;

        let multikey = doc
            .verification_method
            .iter()
            .find(|method| method.id.ends_with("#atproto"))
            .and_then(|method| method.public_key_multibase.as_ref())
            .ok_or_else(|| anyhow!("signing key not found for did {did}"))?;

        decode_multikey(multikey)
    }
}

impl Default for ServiceAuth {
    fn default() -> Self {
        Self::new()
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| anyhow!("missing authorization header"))?
        .to_str()
        .context("authorization header is not valid UTF-8")?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| anyhow!("authorization header is not a bearer token"))
}

/// Split a compact JWT into its signing input, decoded header and claims,
/// and raw signature bytes.
fn split_token(token: &str) -> Result<(&str, TokenHeader, TokenClaims, Vec<u8>)> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("token is not a compact JWT");
    };

    let header: TokenHeader = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(header_b64)
            .context("token header is not base64url")?,
    )
    .context("malformed token header")?;
    let claims: TokenClaims = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(claims_b64)
            .context("token claims are not base64url")?,
    )
    .context("malformed token claims")?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .context("token signature is not base64url")?;

    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    Ok((signing_input, header, claims, signature))
}

fn check_expiry(claims: &TokenClaims) -> Result<()> {
    if let Some(exp) = claims.exp {
        if exp < Utc::now().timestamp() {
            bail!("token expired");
        }
    }
    Ok(())
}

fn did_doc_url(did: &str) -> Result<String> {
    if did.starts_with("did:plc:") {
        return Ok(format!("{PLC_DIRECTORY}/{did}"));
    }
    if let Some(host) = did.strip_prefix("did:web:") {
        return Ok(format!("https://{host}/.well-known/did.json"));
    }
    bail!("unsupported DID method: {did}")
}

/// Decode a multibase-encoded public key: base58btc payload carrying a
/// multicodec curve prefix and a compressed point.
fn decode_multikey(key: &str) -> Result<PublicKey> {
    let encoded = key
        .strip_prefix('z')
        .ok_or_else(|| anyhow!("unsupported multibase encoding"))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .context("invalid base58 key")?;

    if let Some(point) = bytes.strip_prefix(&MULTICODEC_SECP256K1) {
        return Ok(PublicKey::Secp256k1(point.to_vec()));
    }
    if let Some(point) = bytes.strip_prefix(&MULTICODEC_P256) {
        return Ok(PublicKey::P256(point.to_vec()));
    }
    bail!("unsupported key type")
}

fn verify_signature(alg: &str, key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
    match (alg, key) {
        ("ES256K", PublicKey::Secp256k1(point)) => {
            use k256::ecdsa::signature::Verifier;
            use k256::ecdsa::{Signature, VerifyingKey};

            let key = VerifyingKey::from_sec1_bytes(point).context("invalid secp256k1 key")?;
            let mut sig = Signature::from_slice(signature).context("malformed signature")?;
            // Lenient on high-S signatures, as upstream verifiers are.
            if let Some(normalized) = sig.normalize_s() {
                sig = normalized;
            }
            key.verify(message, &sig).map_err(|_| anyhow!("invalid token signature"))
        }
        ("ES256", PublicKey::P256(point)) => {
            use p256::ecdsa::signature::Verifier;
            use p256::ecdsa::{Signature, VerifyingKey};

            let key = VerifyingKey::from_sec1_bytes(point).context("invalid p256 key")?;
            let mut sig = Signature::from_slice(signature).context("malformed signature")?;
            if let Some(normalized) = sig.normalize_s() {
                sig = normalized;
            }
            key.verify(message, &sig).map_err(|_| anyhow!("invalid token signature"))
        }
        _ => bail!("algorithm {alg} does not match the published key type"),
    }
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::signature::Signer;

    use super::*;

    fn encode_multikey(prefix: [u8; 2], point: &[u8]) -> String {
        let mut bytes = prefix.to_vec();
        bytes.extend_from_slice(point);
        format!("z{}", bs58::encode(bytes).into_string())
    }

    #[test]
    fn multikey_roundtrips_a_secp256k1_key() {
        let point = [0x02u8; 33];
        let key = decode_multikey(&encode_multikey(MULTICODEC_SECP256K1, &point)).unwrap();
        match key {
            PublicKey::Secp256k1(decoded) => assert_eq!(decoded, point),
            PublicKey::P256(_) => panic!("wrong curve"),
        }
    }

    #[test]
    fn multikey_rejects_unknown_codecs_and_encodings() {
        assert!(decode_multikey("uNOTBASE58BTC").is_err());
        assert!(decode_multikey(&encode_multikey([0xaa, 0xbb], &[0x02; 33])).is_err());
    }

    #[test]
    fn split_token_extracts_claims_and_signing_input() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256K","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(r#"{"iss":"did:plc:caller","exp":4102444800}"#);
        let signature = URL_SAFE_NO_PAD.encode([0u8; 64]);
        let token = format!("{header}.{claims}.{signature}");

        let (signing_input, parsed_header, parsed_claims, sig) = split_token(&token).unwrap();
        assert_eq!(signing_input, format!("{header}.{claims}"));
        assert_eq!(parsed_header.alg, "ES256K");
        assert_eq!(parsed_claims.iss, "did:plc:caller");
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn split_token_rejects_extra_segments() {
        assert!(split_token("a.b").is_err());
        assert!(split_token("a.b.c.d").is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let expired = TokenClaims {
            iss: "did:plc:caller".to_string(),
            exp: Some(Utc::now().timestamp() - 60),
        };
        assert!(check_expiry(&expired).is_err());

        let live = TokenClaims {
            iss: "did:plc:caller".to_string(),
            exp: Some(Utc::now().timestamp() + 60),
        };
        assert!(check_expiry(&live).is_ok());
    }

    #[test]
    fn verifies_a_signature_from_the_matching_key() {
        let signing_key = k256::ecdsa::SigningKey::from_slice(&[0x01; 32]).unwrap();
        let point = signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();
        let key = PublicKey::Secp256k1(point);

        let message = b"header.payload";
        let signature: k256::ecdsa::Signature = signing_key.sign(message);
        let raw = signature.to_bytes();

        assert!(verify_signature("ES256K", &key, message, raw.as_slice()).is_ok());
        assert!(verify_signature("ES256K", &key, b"tampered", raw.as_slice()).is_err());
        // Key type and algorithm must agree.
        assert!(verify_signature("ES256", &key, message, raw.as_slice()).is_err());
    }

    #[test]
    fn did_doc_urls_cover_plc_and_web() {
        assert_eq!(
            did_doc_url("did:plc:abc").unwrap(),
            "https://plc.directory/did:plc:abc"
        );
        assert_eq!(
            did_doc_url("did:web:feed.example.com").unwrap(),
            "https://feed.example.com/.well-known/did.json"
        );
        assert!(did_doc_url("did:key:z123").is_err());
    }
}
