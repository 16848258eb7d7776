//! Command implementations.

pub mod join;
pub mod serve;
pub mod smoke;

use crate::cli::OriginArgs;
use crate::ui;
use framewire_types::{load_config, BusConfig, OriginPolicy};
use std::path::PathBuf;
use std::time::Duration;

/// Print an error and exit non-zero.
pub fn fail(msg: &str) -> ! {
    ui::error(msg);
    std::process::exit(1);
}

/// Build a multi-threaded runtime or exit.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail(&format!("Failed to create Tokio runtime: {e}")))
}

/// Bus configuration from `--config`, or from `name` plus the origin flags.
pub fn resolve_config(
    config: Option<PathBuf>,
    origins: &OriginArgs,
    name: &str,
) -> Result<BusConfig, String> {
    if let Some(path) = config {
        return load_config(&path).map_err(|e| format!("{}: {e}", path.display()));
    }
    let policy = origin_policy(origins)?;
    let config = BusConfig::new(name, policy);
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn origin_policy(origins: &OriginArgs) -> Result<OriginPolicy, String> {
    if origins.any_origin {
        Ok(OriginPolicy::AcceptAny)
    } else if !origins.allow_origin.is_empty() {
        Ok(OriginPolicy::allow(origins.allow_origin.iter().cloned()))
    } else {
        Err("an origin policy is required: pass --config, --any-origin or --allow-origin ID".into())
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
