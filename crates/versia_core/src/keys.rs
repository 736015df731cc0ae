/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::{fs, path::Path};

use crate::http_sig::encode_public_key;

const KEY_FILE: &str = "instance_ed25519.key";

/// Instance-level signing key, used for outbound deliveries.
#[derive(Clone)]
pub struct InstanceIdentity {
    pub signing_key: SigningKey,
    /// Base64 SPKI, as published in `/.well-known/versia`.
    pub public_key: String,
}

impl InstanceIdentity {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = encode_public_key(&signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }
}

pub fn load_or_generate_identity(dir: impl AsRef<Path>) -> Result<InstanceIdentity> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("create data dir: {}", dir.display()))?;

    let path = dir.join(KEY_FILE);
    let signing_key = if path.exists() {
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let raw = B64
            .decode(text.trim().as_bytes())
            .with_context(|| format!("decode {}", path.display()))?;
        let seed: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("{} must hold a 32-byte seed", path.display()))?;
        SigningKey::from_bytes(&seed)
    } else {
        let key = SigningKey::generate(&mut OsRng);
        fs::write(&path, B64.encode(key.to_bytes())).with_context(|| format!("write {}", path.display()))?;
        key
    };
    Ok(InstanceIdentity::from_signing_key(signing_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let a = load_or_generate_identity(dir.path()).unwrap();
        let b = load_or_generate_identity(dir.path()).unwrap();
        assert_eq!(a.public_key, b.public_key);
        assert!(dir.path().join(KEY_FILE).exists());
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(KEY_FILE), "AAAA").unwrap();
        assert!(load_or_generate_identity(dir.path()).is_err());
    }
}
