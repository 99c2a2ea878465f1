use anyhow::{Context, Result};
use tracing::info;

use super::common;
use crate::cli::{Action, WorkspaceArgs};
use crate::provider::WorkspaceRequest;
use crate::types::Workspace;

pub async fn cmd_workspace(config_path: &str, args: WorkspaceArgs) -> Result<()> {
    let provider = common::provider(config_path).await?;
    let req = WorkspaceRequest {
        workspace: Workspace {
            name: args.name.clone().unwrap_or_else(|| args.id.clone()),
            id: args.id.clone(),
        },
        target_options: common::read_target_options(&args.target)?,
        log_sink: None,
    };

    let result = match args.action {
        Action::Create => provider.create_workspace(&req).await,
        Action::Start => provider.start_workspace(&req).await,
        Action::Stop => provider.stop_workspace(&req).await,
        Action::Destroy => provider.destroy_workspace(&req).await,
        Action::Info => {
            let info = provider.get_workspace_info(&req).await;
            if let Ok(info) = &info {
                println!("{}", serde_json::to_string_pretty(info)?);
            }
            info.map(|_| ())
        }
    };
    provider.shutdown().await;

    result.with_context(|| format!("workspace {:?} {}", args.action, args.id))?;
    info!(workspace = %args.id, action = ?args.action, "done");
    Ok(())
}
