use std::io::{Cursor, Read, Write};

use ini::Ini;
use tracing::{debug, info};

use super::wait::{poll_until, PollPolicy};
use super::Orchestrator;
use crate::engine::ExecSpec;
use crate::error::{Error, Result};
use crate::logs::LogSink;
use crate::types::{GitUser, Repository};

fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(path)
}

/// Content of the first regular file in a tar archive.
fn first_file(archive: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(Cursor::new(archive));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Ok(Vec::new())
}

/// Single-file archive with mode 0600.
fn single_file_archive(name: &str, content: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o600);
    header.set_entry_type(tar::EntryType::Regular);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, content)?;
    Ok(builder.into_inner()?)
}

/// Merge the credential helper and optional identity into a gitconfig.
pub(crate) fn merge_gitconfig(
    existing: &[u8],
    helper: &str,
    git_user: Option<&GitUser>,
) -> Result<Vec<u8>> {
    let existing = String::from_utf8_lossy(existing);
    let mut config = Ini::load_from_str(&existing)
        .map_err(|e| Error::operation("parse .gitconfig", e))?;

    config.with_section(Some("credential")).set("helper", helper);
    if let Some(user) = git_user {
        config
            .with_section(Some("user"))
            .set("name", user.name.as_str())
            .set("email", user.email.as_str());
    }

    Ok(write_gitconfig(&config).into_bytes())
}

/// Render in git's own syntax. Values git would cut at a comment character
/// or trim are double-quoted, with `"` and `\` escaped.
fn write_gitconfig(config: &Ini) -> String {
    let mut out = String::new();
    for (section, properties) in config.iter() {
        if properties.is_empty() && section.is_none() {
            continue;
        }
        if let Some(section) = section {
            out.push_str(&format!("[{}]\n", section));
        }
        for (key, value) in properties.iter() {
            out.push_str(&format!("\t{} = {}\n", key, quote_git_value(value)));
        }
    }
    out
}

fn quote_git_value(value: &str) -> String {
    let needs_quotes = value.contains(|c: char| matches!(c, ';' | '#' | '"' | '\\' | '\n' | '\t'))
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

impl Orchestrator {
    /// Clone `repository` into `path` inside the container.
    ///
    /// With a branch only that branch is fetched. With a SHA the clone is
    /// followed by an explicit checkout. Skipped when `path` is already a
    /// git checkout.
    pub async fn clone_repository(
        &self,
        container: &str,
        user: &str,
        repository: &Repository,
        path: &str,
        sink: &mut LogSink,
    ) -> Result<()> {
        let git_dir = format!("{}/.git", path.trim_end_matches('/'));
        if self.engine.stat_path(container, &git_dir).await? {
            debug!(container = %container, path = %path, "repository already cloned");
            return Ok(());
        }

        let mut cmd = vec!["git".to_string(), "clone".to_string()];
        if let Some(branch) = repository.branch.as_deref().filter(|b| !b.is_empty()) {
            cmd.extend(["--single-branch".to_string(), "--branch".to_string(), branch.to_string()]);
        }
        cmd.extend([repository.url.clone(), path.to_string()]);

        sink.line(format!("Cloning repository {}", repository.url))?;
        let output = self.exec_sync(container, &ExecSpec::new(cmd, user)).await?;
        sink.write_all(output.stderr.as_bytes())?;
        sink.write_all(output.stdout.as_bytes())?;

        if let Some(sha) = repository.sha.as_deref().filter(|s| !s.is_empty()) {
            sink.line(format!("Checking out {}", sha))?;
            let checkout = ExecSpec::new(["git", "-C", path, "checkout", sha], user);
            self.exec_sync(container, &checkout).await?;
        }

        info!(container = %container, url = %repository.url, path = %path, "repository cloned");
        Ok(())
    }

    /// Point git at the agent's credential helper and set the commit
    /// identity, preserving whatever else the user's gitconfig holds.
    pub async fn configure_git_credentials(
        &self,
        container: &str,
        user: &str,
        git_user: Option<&GitUser>,
    ) -> Result<()> {
        let home = self.home_dir(container, user).await?;
        let path = format!("{}/.gitconfig", home.trim_end_matches('/'));

        let existing = match self.read_file(container, &path).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };

        let helper = format!("{} git-cred", self.config.agent.binary_path);
        let merged = merge_gitconfig(&existing, &helper, git_user)?;
        self.write_file(container, user, &path, &merged).await?;

        debug!(container = %container, path = %path, "git credentials configured");
        Ok(())
    }

    /// Home directory of `user` inside the container.
    pub async fn home_dir(&self, container: &str, user: &str) -> Result<String> {
        let output = self
            .exec_sync(container, &ExecSpec::new(["/bin/sh", "-c", "cd && pwd"], user))
            .await?;
        let home = output.stdout.trim().to_string();
        if home.is_empty() {
            return Err(Error::operation(
                "resolve home directory",
                format!("empty output for user {} in {}", user, container),
            ));
        }
        Ok(home)
    }

    /// Read one file out of the container.
    pub async fn read_file(&self, container: &str, path: &str) -> Result<Vec<u8>> {
        let archive = self.engine.copy_from_container(container, path).await?;
        first_file(&archive)
    }

    /// Write `content` to `path` (mode 0600), creating the parent directory
    /// as `user` and handing the file to `user`.
    pub async fn write_file(
        &self,
        container: &str,
        user: &str,
        path: &str,
        content: &[u8],
    ) -> Result<()> {
        let dir = parent_dir(path);
        self.exec_sync(container, &ExecSpec::new(["mkdir", "-p", dir], user))
            .await?;

        let archive = single_file_archive(file_name(path), content)?;
        self.engine.copy_to_container(container, dir, archive).await?;

        let owner = format!("{}:{}", user, user);
        self.exec_sync(container, &ExecSpec::new(["chown", owner.as_str(), path], "root"))
            .await?;
        Ok(())
    }

    /// Wait until `path` exists inside the container.
    pub async fn wait_for_path(&self, container: &str, path: &str) -> Result<()> {
        let policy = PollPolicy::new(&self.config.polling, self.config.polling.agent_timeout());
        poll_until("wait for agent binary", policy, &self.cancel, || {
            let engine = self.engine.clone();
            async move { engine.stat_path(container, path).await }
        })
        .await?;
        debug!(container = %container, path = %path, "path present");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_dir("/home/dev/.gitconfig"), "/home/dev");
        assert_eq!(parent_dir("/.gitconfig"), "/");
        assert_eq!(file_name("/home/dev/.gitconfig"), ".gitconfig");
    }

    #[test]
    fn test_archive_first_file() {
        let archive = single_file_archive(".gitconfig", b"[core]\n").unwrap();
        assert_eq!(first_file(&archive).unwrap(), b"[core]\n");
        assert!(first_file(&tar::Builder::new(Vec::new()).into_inner().unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_archive_mode() {
        let archive = single_file_archive("f", b"x").unwrap();
        let mut archive = tar::Archive::new(Cursor::new(archive));
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap(), 0o600);
    }

    #[test]
    fn test_merge_gitconfig_preserves_existing() {
        let existing = b"[core]\neditor = vim\n[credential]\nhelper = store\n";
        let user = GitUser {
            name: "Dev".to_string(),
            email: "dev@example.com".to_string(),
        };

        let merged =
            merge_gitconfig(existing, "/usr/local/bin/dockspace git-cred", Some(&user)).unwrap();
        let parsed = Ini::load_from_str(&String::from_utf8(merged).unwrap()).unwrap();

        assert_eq!(parsed.get_from(Some("core"), "editor"), Some("vim"));
        assert_eq!(
            parsed.get_from(Some("credential"), "helper"),
            Some("/usr/local/bin/dockspace git-cred")
        );
        assert_eq!(parsed.get_from(Some("user"), "email"), Some("dev@example.com"));
    }

    #[test]
    fn test_merge_gitconfig_without_identity() {
        let merged = merge_gitconfig(b"", "helper-bin", None).unwrap();
        let parsed = Ini::load_from_str(&String::from_utf8(merged).unwrap()).unwrap();
        assert_eq!(parsed.get_from(Some("credential"), "helper"), Some("helper-bin"));
        assert!(parsed.section(Some("user")).is_none());
    }

    #[test]
    fn test_merge_gitconfig_keeps_quoted_alias() {
        let existing = br#"[alias]
	sw = "!f() { git switch \"$1\"; }; f"
	co = checkout
"#;
        let merged = merge_gitconfig(existing, "helper-bin", None).unwrap();
        let text = String::from_utf8(merged).unwrap();

        assert!(text.contains(r#"sw = "!f() { git switch \"$1\"; }; f""#), "{}", text);
        assert!(text.contains("co = checkout\n"));

        let parsed = Ini::load_from_str(&text).unwrap();
        assert_eq!(
            parsed.get_from(Some("alias"), "sw"),
            Some(r#"!f() { git switch "$1"; }; f"#)
        );
    }

    #[test]
    fn test_quote_git_value() {
        assert_eq!(quote_git_value("vim"), "vim");
        assert_eq!(quote_git_value("a # b"), r#""a # b""#);
        assert_eq!(quote_git_value(" padded"), r#"" padded""#);
        assert_eq!(quote_git_value(r"C:\bin"), r#""C:\\bin""#);
    }
}
