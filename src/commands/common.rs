use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::cli::TargetOptionsArgs;
use crate::config::ProviderConfig;
use crate::provider::Provider;
use crate::types::GitUser;

pub fn load_config(path: &str) -> Result<ProviderConfig> {
    let path = PathBuf::from(shellexpand::tilde(path).as_ref());
    ProviderConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Build and initialize a provider from the configuration file.
pub async fn provider(config_path: &str) -> Result<Provider> {
    let provider = Provider::new(load_config(config_path)?);
    provider
        .initialize()
        .await
        .context("initializing provider")?;
    Ok(provider)
}

pub fn read_target_options(args: &TargetOptionsArgs) -> Result<String> {
    match &args.options_file {
        Some(file) => {
            let path = shellexpand::tilde(file).into_owned();
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))
        }
        None => Ok(args.options.clone()),
    }
}

/// Parse `Name <email>`.
pub fn parse_git_user(value: &str) -> Result<GitUser> {
    let (name, rest) = value
        .split_once('<')
        .with_context(|| format!("git user must look like 'Name <email>', got '{}'", value))?;
    let email = rest.trim().trim_end_matches('>').trim();
    if name.trim().is_empty() || email.is_empty() {
        bail!("git user must look like 'Name <email>', got '{}'", value);
    }
    Ok(GitUser {
        name: name.trim().to_string(),
        email: email.to_string(),
    })
}

pub fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("environment variable must be KEY=VALUE, got '{}'", pair))?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_git_user() {
        let user = parse_git_user("Ada Lovelace <ada@example.com>").unwrap();
        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.email, "ada@example.com");

        assert!(parse_git_user("ada@example.com").is_err());
        assert!(parse_git_user(" <ada@example.com>").is_err());
    }

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");
        assert!(parse_env(&["NOVALUE".to_string()]).is_err());
    }
}
