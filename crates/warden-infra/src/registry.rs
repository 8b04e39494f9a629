//! Registry origins backed by the filesystem and git.
//!
//! [`GitLoader`] clones a remote repository of template actions into a
//! local cache and reads it with the same loader as a local directory.
//! [`load_configured`] populates a registry from [`RegistryConfig`].

use std::path::{Path, PathBuf};

use warden_core::registry::{ActionLoader, ActionRegistry, ActionSpec, RegistryError, RegistryOrigin, TemplateDirLoader};
use warden_types::config::RegistryConfig;

// ---------------------------------------------------------------------------
// Git URLs
// ---------------------------------------------------------------------------

/// The parts of a git remote we care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    /// Repository path without a trailing `.git`, e.g. `org/repo`.
    pub path: String,
}

/// Parse `https://host/org/repo(.git)`, `ssh://git@host/org/repo` or
/// `git@host:org/repo`. An optional `git+` prefix is ignored.
pub fn parse_git_url(url: &str) -> Result<GitUrl, String> {
    let url = url.strip_prefix("git+").unwrap_or(url);
    let (host, path) = if let Some(rest) = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("ssh://"))
    {
        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| format!("git url '{url}' has no repository path"))?;
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = host.split_once(':').map_or(host, |(h, _)| h);
        (host, path)
    } else if let Some((user_host, path)) = url.split_once(':') {
        let host = user_host.rsplit_once('@').map_or(user_host, |(_, h)| h);
        (host, path)
    } else {
        return Err(format!("unsupported git url '{url}'"));
    };

    let path = path.trim_matches('/').trim_end_matches(".git");
    if host.is_empty() || path.is_empty() {
        return Err(format!("git url '{url}' is missing a host or repository path"));
    }
    if path.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(format!("git url '{url}' has an invalid repository path"));
    }
    Ok(GitUrl {
        host: host.to_ascii_lowercase(),
        path: path.to_string(),
    })
}

/// Turn a configured remote (`<url>[@<ref>]`) into an origin. The ref is
/// only split off when the `@` comes after the last `/`.
pub fn remote_origin(spec: &str) -> RegistryOrigin {
    let spec = spec.strip_prefix("git+").unwrap_or(spec);
    match spec.rsplit_once('@') {
        Some((url, reference)) if !reference.contains('/') && url.contains('/') && !reference.is_empty() => {
            RegistryOrigin::RemoteGit {
                url: url.to_string(),
                reference: Some(reference.to_string()),
            }
        }
        _ => RegistryOrigin::RemoteGit {
            url: spec.to_string(),
            reference: None,
        },
    }
}

/// Platform cache directory for cloned registries.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("warden")
        .join("registry")
}

// ---------------------------------------------------------------------------
// GitLoader
// ---------------------------------------------------------------------------

pub struct GitLoader {
    allowed_domains: Vec<String>,
    cache_dir: PathBuf,
}

impl GitLoader {
    pub fn new(allowed_domains: Vec<String>, cache_dir: PathBuf) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_ascii_lowercase()).collect(),
            cache_dir,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        let cache_dir = config
            .cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_cache_dir);
        Self::new(config.allowed_git_domains.clone(), cache_dir)
    }

    /// Validate `url` against the allow-list and return its parsed form.
    pub fn check_url(&self, url: &str) -> Result<GitUrl, String> {
        let parsed = parse_git_url(url)?;
        if !self.allowed_domains.iter().any(|d| d == &parsed.host) {
            return Err(format!(
                "git host '{}' is not allowed (allowed: {})",
                parsed.host,
                self.allowed_domains.join(", ")
            ));
        }
        Ok(parsed)
    }

    /// Where `url` at `reference` is checked out.
    fn checkout_dir(&self, url: &GitUrl, reference: Option<&str>) -> PathBuf {
        let mut dir = self.cache_dir.join(&url.host);
        for segment in url.path.split('/') {
            dir.push(segment);
        }
        let leaf = reference
            .map(|r| r.replace(['/', '\\'], "_"))
            .unwrap_or_else(|| "HEAD".to_string());
        dir.join(leaf)
    }

    async fn clone_into(&self, url: &str, reference: Option<&str>, dir: &Path) -> Result<(), String> {
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|e| format!("failed to clear {}: {e}", dir.display()))?;
        }
        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }

        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("clone").arg("--depth").arg("1");
        if let Some(reference) = reference {
            cmd.arg("--branch").arg(reference);
        }
        cmd.arg("--").arg(url).arg(dir);
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        tracing::info!(url, reference = ?reference, dir = %dir.display(), "cloning remote registry");
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("failed to run git: {e}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("git clone failed ({}): {}", output.status, stderr.trim()));
        }
        Ok(())
    }
}

impl ActionLoader for GitLoader {
    async fn load(&self, origin: &RegistryOrigin) -> Result<Vec<ActionSpec>, RegistryError> {
        let RegistryOrigin::RemoteGit { url, reference } = origin else {
            return Err(RegistryError::load(origin, "not a git origin"));
        };
        let parsed = self.check_url(url).map_err(|e| RegistryError::load(origin, e))?;
        let dir = self.checkout_dir(&parsed, reference.as_deref());
        self.clone_into(url, reference.as_deref(), &dir)
            .await
            .map_err(|e| RegistryError::load(origin, e))?;
        TemplateDirLoader::load_dir(&dir, origin).await
    }
}

// ---------------------------------------------------------------------------
// Startup loading
// ---------------------------------------------------------------------------

/// Load the local directory (when enabled) and every configured remote.
/// Returns the number of actions loaded.
pub async fn load_configured(registry: &ActionRegistry, config: &RegistryConfig) -> Result<usize, RegistryError> {
    let mut total = 0;
    if config.local_enabled {
        let origin = RegistryOrigin::LocalDirectory {
            path: PathBuf::from(&config.local_path),
        };
        total += registry.load(&TemplateDirLoader, &origin).await?;
    }
    if !config.remote_urls.is_empty() {
        let git = GitLoader::from_config(config);
        for remote in &config.remote_urls {
            total += registry.load(&git, &remote_origin(remote)).await?;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_common_git_url_forms() {
        let https = parse_git_url("git+https://github.com/acme/actions.git").unwrap();
        assert_eq!(
            https,
            GitUrl {
                host: "github.com".to_string(),
                path: "acme/actions".to_string()
            }
        );
        let ssh = parse_git_url("ssh://git@GitLab.com:22/acme/tools").unwrap();
        assert_eq!(ssh.host, "gitlab.com");
        assert_eq!(ssh.path, "acme/tools");
        let scp = parse_git_url("git@bitbucket.org:acme/repo.git").unwrap();
        assert_eq!(scp.host, "bitbucket.org");
        assert_eq!(scp.path, "acme/repo");
    }

    #[test]
    fn rejects_bad_git_urls() {
        assert!(parse_git_url("github.com").is_err());
        assert!(parse_git_url("https://github.com").is_err());
        assert!(parse_git_url("https://github.com/acme/../etc").is_err());
    }

    #[test]
    fn remote_origin_splits_reference() {
        assert_eq!(
            remote_origin("git+https://github.com/acme/actions.git@v1.2"),
            RegistryOrigin::RemoteGit {
                url: "https://github.com/acme/actions.git".to_string(),
                reference: Some("v1.2".to_string()),
            }
        );
        assert_eq!(
            remote_origin("git@github.com:acme/actions.git"),
            RegistryOrigin::RemoteGit {
                url: "git@github.com:acme/actions.git".to_string(),
                reference: None,
            }
        );
    }

    #[test]
    fn checkout_dir_is_scoped_by_host_path_and_ref() {
        let loader = GitLoader::new(vec!["github.com".to_string()], PathBuf::from("/cache"));
        let url = parse_git_url("https://github.com/acme/actions").unwrap();
        assert_eq!(
            loader.checkout_dir(&url, Some("release/1")),
            PathBuf::from("/cache/github.com/acme/actions/release_1")
        );
        assert_eq!(loader.checkout_dir(&url, None), PathBuf::from("/cache/github.com/acme/actions/HEAD"));
    }

    #[tokio::test]
    async fn disallowed_host_fails_before_cloning() {
        let tmp = TempDir::new().unwrap();
        let loader = GitLoader::new(vec!["github.com".to_string()], tmp.path().to_path_buf());
        let origin = remote_origin("https://evil.example.com/acme/actions.git");
        let err = loader.load(&origin).await.unwrap_err();
        assert!(err.to_string().contains("not allowed"), "{err}");
        assert!(!tmp.path().join("evil.example.com").exists());
    }

    #[tokio::test]
    async fn load_configured_reads_local_directory() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("greet.yml"),
            r#"
namespace: tools.local
name: greet
expects:
  who:
    type: str
uses: core.transform.reshape
args:
  value: "hello ${{ INPUTS.who }}"
"#,
        )
        .await
        .unwrap();

        let registry = ActionRegistry::with_bundled();
        let config = RegistryConfig {
            local_enabled: true,
            local_path: tmp.path().to_string_lossy().into_owned(),
            ..RegistryConfig::default()
        };
        let loaded = load_configured(&registry, &config).await.unwrap();
        assert_eq!(loaded, 1);
        assert!(registry.contains("tools.local.greet"));
    }

    #[tokio::test]
    async fn load_configured_skips_disabled_local_directory() {
        let registry = ActionRegistry::new();
        let loaded = load_configured(&registry, &RegistryConfig::default()).await.unwrap();
        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }
}
