/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};
use versia_core::config::{default_config_path, InboxConfig};

fn parse_config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok(Some(PathBuf::from(path)));
            }
            return Err(anyhow::anyhow!("--config requires a path"));
        }
    }
    if let Ok(path) = std::env::var("VERSIA_CONFIG") {
        if !path.trim().is_empty() {
            return Ok(Some(PathBuf::from(path)));
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cfg = match parse_config_path()? {
        Some(path) => {
            info!("config: {}", path.display());
            InboxConfig::load(&path)?
        }
        None => {
            let path = default_config_path();
            if path.exists() {
                info!("config: {}", path.display());
                InboxConfig::load(&path)?
            } else {
                warn!("config missing: {}, using defaults", path.display());
                InboxConfig::default()
            }
        }
    };

    info!("versia inbox service starting");
    versia_core::server::serve(cfg).await
}
