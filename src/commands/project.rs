use anyhow::{Context, Result};
use tracing::info;

use super::common;
use crate::cli::{Action, ProjectArgs};
use crate::provider::ProjectRequest;
use crate::types::{Project, Repository};

pub async fn cmd_project(config_path: &str, args: ProjectArgs) -> Result<()> {
    let provider = common::provider(config_path).await?;

    let git_user = args
        .git_user
        .as_deref()
        .map(common::parse_git_user)
        .transpose()?;
    let req = ProjectRequest {
        project: Project {
            name: args.name.clone(),
            workspace_id: args.workspace.clone(),
            image: args.image.clone(),
            user: args.user.clone(),
            repository: Repository {
                url: args.repo.clone(),
                branch: args.branch.clone(),
                sha: args.sha.clone(),
                git_user,
            },
            env_vars: common::parse_env(&args.env)?,
            api_key: args.api_key.clone(),
        },
        target_options: common::read_target_options(&args.target)?,
        registry: None,
        log_sink: None,
    };

    let result = match args.action {
        Action::Create => provider.create_project(&req).await,
        Action::Start => provider.start_project(&req).await,
        Action::Stop => provider.stop_project(&req).await,
        Action::Destroy => provider.destroy_project(&req).await,
        Action::Info => {
            let info = provider.get_project_info(&req).await;
            if let Ok(info) = &info {
                println!("{}", serde_json::to_string_pretty(info)?);
            }
            info.map(|_| ())
        }
    };

    if result.is_ok() && args.action == Action::Start && args.follow {
        info!(container = %req.project.container_name(), "following logs, Ctrl-C to detach");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
    }
    provider.shutdown().await;

    result.with_context(|| format!("project {:?} {}", args.action, req.project.container_name()))?;
    Ok(())
}
