//! Docker container cleanup for tools that run inside a container

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Docker names: alphanumerics plus `_`, `.`, `-`, not starting with a separator
pub(crate) fn is_valid_container_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

async fn docker(args: &[&str]) -> Result<bool> {
    let output = Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Execution(format!("docker {}: {}", args.join(" "), e)))?;

    if !output.status.success() {
        debug!(
            args = ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "docker command failed"
        );
    }
    Ok(output.status.success())
}

/// `docker stop`, wait `remove_delay`, then `docker rm -f`
pub(crate) async fn stop_and_remove(container: &str, remove_delay: Duration) -> Result<()> {
    if !is_valid_container_name(container) {
        warn!(container = %container, "Skipping invalid container name");
        return Err(Error::InvalidInput(format!(
            "invalid container name '{}'",
            container
        )));
    }

    let stopped = docker(&["stop", container]).await?;
    tokio::time::sleep(remove_delay).await;
    let removed = docker(&["rm", "-f", container]).await?;

    info!(container = %container, stopped, removed, "Container cleanup finished");
    Ok(())
}
