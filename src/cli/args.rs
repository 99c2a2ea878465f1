use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "dockspace",
    version,
    about = "Development environments on local or SSH-reachable Docker engines"
)]
pub struct Cli {
    /// Provider configuration file (TOML)
    #[arg(long, global = true, default_value = "~/.config/dockspace/config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that a local Docker engine is reachable
    Check,
    /// Resolve a target options blob and show where it points
    Target(TargetArgs),
    /// Manage workspaces (one network per workspace)
    Workspace(WorkspaceArgs),
    /// Manage projects (one container per project)
    Project(ProjectArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Start,
    Stop,
    Destroy,
    Info,
}

#[derive(Args, Debug, Clone)]
pub struct TargetOptionsArgs {
    /// Target options as JSON, e.g. '{"Remote Hostname": "build-host", ...}'
    #[arg(long, default_value = "{}", conflicts_with = "options_file")]
    pub options: String,

    /// Read target options from a JSON file
    #[arg(long)]
    pub options_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    #[command(flatten)]
    pub target: TargetOptionsArgs,
}

#[derive(Args, Debug)]
pub struct WorkspaceArgs {
    #[arg(value_enum)]
    pub action: Action,

    /// Workspace id; also the network name
    #[arg(long)]
    pub id: String,

    /// Display name (defaults to the id)
    #[arg(long)]
    pub name: Option<String>,

    #[command(flatten)]
    pub target: TargetOptionsArgs,
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    #[arg(value_enum)]
    pub action: Action,

    /// Owning workspace id
    #[arg(long)]
    pub workspace: String,

    /// Project name
    #[arg(long, short)]
    pub name: String,

    /// Container image (e.g., mcr.microsoft.com/devcontainers/base:ubuntu)
    #[arg(long, default_value = "mcr.microsoft.com/devcontainers/base:ubuntu")]
    pub image: String,

    /// Container user (defaults to the configured container_user)
    #[arg(long)]
    pub user: Option<String>,

    /// Repository to clone
    #[arg(long, default_value = "")]
    pub repo: String,

    #[arg(long)]
    pub branch: Option<String>,

    /// Commit to check out after cloning
    #[arg(long)]
    pub sha: Option<String>,

    /// Git identity as "Name <email>"
    #[arg(long)]
    pub git_user: Option<String>,

    /// Environment variables (KEY=VALUE), repeatable
    #[arg(long = "env", short = 'e')]
    pub env: Vec<String>,

    /// Agent API key passed to the container
    #[arg(long, default_value = "")]
    pub api_key: String,

    /// After `start`, keep following container logs until Ctrl-C
    #[arg(long)]
    pub follow: bool,

    #[command(flatten)]
    pub target: TargetOptionsArgs,
}
