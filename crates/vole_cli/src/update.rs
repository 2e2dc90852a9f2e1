//! Rig updater: list release tags on origin, show the current one, and check
//! a requested version out after backing up the local protocol tree. All of
//! it goes through the git CLI.

use anyhow::{bail, ensure, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Releases older than this predate the current data layout.
const MIN_VERSION: &str = "0.2.0";

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Updater {
    repo: PathBuf,
}

impl Updater {
    pub fn new(repo: PathBuf) -> Self {
        Self { repo }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let future = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output();
        let output = match tokio::time::timeout(GIT_TIMEOUT, future).await {
            Ok(res) => res.context("Failed to execute git")?,
            Err(_) => bail!("git {} timed out after 30 seconds", args.join(" ")),
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "git {} failed with status {}:\n{}",
                args.join(" "),
                output.status,
                stderr
            );
        } else if !stderr.is_empty() {
            tracing::debug!("git stderr (success): {}", stderr);
        }
        Ok(stdout.to_string())
    }

    pub async fn available_versions(&self) -> Result<Vec<String>> {
        let output = self.git(&["ls-remote", "--tags", "origin"]).await?;
        let mut versions = parse_remote_tags(&output);
        versions.sort();
        Ok(versions)
    }

    pub async fn current_version(&self) -> Result<Option<String>> {
        let output = self.git(&["tag", "--points-at", "HEAD"]).await?;
        Ok(output.lines().next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
    }

    /// Print the current tag and what's available.
    pub async fn info(&self) -> Result<()> {
        self.git(&["remote", "update"]).await?;
        let current = self.current_version().await?;
        let versions = self.available_versions().await?;
        match &current {
            Some(v) => println!("Current version: {v}"),
            None => println!(
                "You appear to be on an untagged revision; try updating to a specific version"
            ),
        }
        println!("Available versions: {versions:?}");
        if let Some(newest) = versions.last() {
            if current.as_deref() != Some(newest) {
                println!("Newest version is {newest}; run `vole update {newest}`");
            } else {
                println!("You are on the latest version");
            }
        }
        Ok(())
    }

    /// Back up `backup_src` into the home directory, then check out the tag.
    /// Local changes ride the stash across the checkout.
    pub async fn checkout_version(
        &self,
        version: &str,
        backup_src: Option<&Path>,
        home: &Path,
    ) -> Result<()> {
        let versions = self.available_versions().await?;
        ensure!(
            versions.iter().any(|v| v.as_str() == version),
            "{version} is not an available version; available: {versions:?}"
        );
        if let Some(src) = backup_src {
            if src.is_dir() {
                let dst = backup_destination(home);
                tracing::info!("backing up {} to {}", src.display(), dst.display());
                vole_session::archive::copy_dir(src, &dst)?;
            } else {
                tracing::warn!("nothing to back up at {}", src.display());
            }
        }
        self.git(&["stash"]).await?;
        let tag = format!("tags/{version}");
        let result = self.git(&["checkout", &tag]).await;
        self.git(&["stash", "pop"]).await.ok();
        result?;
        println!("Checked out {version}");
        Ok(())
    }
}

/// Tag names out of `git ls-remote --tags` output, peeled refs dropped,
/// filtered to supported releases.
pub fn parse_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (_, tag) = line.split_once("refs/tags/")?;
            let tag = tag.trim();
            if tag.contains("^{}") || tag.is_empty() {
                return None;
            }
            Some(tag.to_string())
        })
        .filter(|tag| tag.as_str() >= MIN_VERSION)
        .collect()
}

/// First free backup name under `home`: `vole_config.bk`, then `.bk0`,
/// `.bk1`, ...
fn backup_destination(home: &Path) -> PathBuf {
    let mut dst = home.join("vole_config.bk");
    while dst.exists() {
        let name = dst
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "vole_config.bk".to_string());
        let next = match name.chars().last().and_then(|c| c.to_digit(10)) {
            Some(digit) => format!("{}{}", &name[..name.len() - 1], digit + 1),
            None => format!("{name}0"),
        };
        dst = home.join(next);
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_and_filters_remote_tags() {
        let output = "\
abc123\trefs/tags/0.1.0\n\
def456\trefs/tags/0.2.0\n\
def456\trefs/tags/0.2.0^{}\n\
0a0a0a\trefs/tags/0.3.1\n";
        let tags = parse_remote_tags(output);
        // 0.1.0 predates the supported range; the peeled ref is dropped.
        assert_eq!(tags, vec!["0.2.0", "0.3.1"]);
    }

    #[test]
    fn empty_output_yields_no_tags() {
        assert!(parse_remote_tags("").is_empty());
    }

    #[test]
    fn backup_names_do_not_collide() {
        let home = tempdir().unwrap();
        let first = backup_destination(home.path());
        assert!(first.ends_with("vole_config.bk"));
        std::fs::create_dir(&first).unwrap();

        let second = backup_destination(home.path());
        assert!(second.ends_with("vole_config.bk0"));
        std::fs::create_dir(&second).unwrap();

        let third = backup_destination(home.path());
        assert!(third.ends_with("vole_config.bk1"));
    }
}
