/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use http::Method;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const ALGORITHM_ED25519: &str = "ed25519";

/// DER prefix of an Ed25519 SubjectPublicKeyInfo; the raw key follows.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

pub fn body_digest_b64(body: &[u8]) -> String {
    B64.encode(Sha256::digest(body))
}

pub fn build_signing_string(method: &Method, path_and_query: &str, nonce: &str, body: &[u8]) -> String {
    // {method} {encoded request target} {nonce} {base64 sha256(body)}
    format!(
        "{} {} {} {}",
        method.as_str().to_ascii_lowercase(),
        urlencoding::encode(path_and_query),
        nonce,
        body_digest_b64(body)
    )
}

/// Accepts raw 32-byte keys, SPKI DER and SPKI PEM, all base64.
pub fn parse_public_key(key: &str, algorithm: &str) -> Result<VerifyingKey> {
    if !algorithm.trim().eq_ignore_ascii_case(ALGORITHM_ED25519) {
        return Err(anyhow!("unsupported key algorithm: {algorithm}"));
    }
    let b64: String = key
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with("-----"))
        .collect();
    let der = B64.decode(b64.as_bytes()).context("decode public key")?;
    let raw: &[u8] = match der.len() {
        32 => &der,
        44 if der[..12] == ED25519_SPKI_PREFIX => &der[12..],
        n => return Err(anyhow!("bad public key length: {n}")),
    };
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(raw);
    VerifyingKey::from_bytes(&bytes).context("invalid ed25519 public key")
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    let mut der = ED25519_SPKI_PREFIX.to_vec();
    der.extend_from_slice(key.as_bytes());
    B64.encode(der)
}

pub fn verify_request(
    public_key: &str,
    algorithm: &str,
    method: &Method,
    path_and_query: &str,
    nonce: &str,
    body: &[u8],
    signature_b64: &str,
) -> Result<()> {
    let key = parse_public_key(public_key, algorithm)?;
    let sig_bytes = B64
        .decode(signature_b64.trim().as_bytes())
        .context("decode signature")?;
    let sig = Signature::from_slice(&sig_bytes).context("invalid signature bytes")?;
    let signing_string = build_signing_string(method, path_and_query, nonce, body);
    key.verify(signing_string.as_bytes(), &sig)
        .context("signature verify failed")?;
    Ok(())
}

pub fn sign_request(
    signing_key: &SigningKey,
    method: &Method,
    path_and_query: &str,
    nonce: &str,
    body: &[u8],
) -> String {
    let signing_string = build_signing_string(method, path_and_query, nonce, body);
    let sig: Signature = signing_key.sign(signing_string.as_bytes());
    B64.encode(sig.to_bytes())
}

pub fn new_nonce() -> String {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
