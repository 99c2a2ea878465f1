use anyhow::{bail, Result};
use tracing::{info, warn};

use super::common;
use crate::cli::TargetArgs;
use crate::options::ConnectionOptions;
use crate::provider::Provider;

pub async fn cmd_check(config_path: &str) -> Result<()> {
    let provider = Provider::new(common::load_config(config_path)?);
    let statuses = provider.check_requirements().await;

    let mut unmet = 0;
    for status in &statuses {
        if status.met {
            info!(requirement = %status.name, "{}", status.reason);
        } else {
            warn!(requirement = %status.name, "{}", status.reason);
            unmet += 1;
        }
    }

    if unmet > 0 {
        bail!("{} requirement(s) not met", unmet);
    }
    Ok(())
}

pub async fn cmd_target(args: TargetArgs) -> Result<()> {
    let blob = common::read_target_options(&args.target)?;
    let (options, is_local) = ConnectionOptions::resolve(&blob)?;

    match &options.remote {
        None => info!(
            socket = options.sock_path.as_deref().unwrap_or("default"),
            "local engine"
        ),
        Some(remote) => info!(
            host = %remote.hostname,
            port = remote.port,
            user = %remote.user,
            remote_socket = %options.remote_socket(),
            data_dir = %remote.data_dir,
            "remote engine over SSH"
        ),
    }
    println!("{}", if is_local { "local" } else { "remote" });
    Ok(())
}
