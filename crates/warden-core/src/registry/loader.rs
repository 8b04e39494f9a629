//! Loaders turn a [`RegistryOrigin`] into action specs.

use std::future::Future;
use std::path::{Path, PathBuf};

use super::RegistryError;
use super::builtin::{self, BUNDLED_PACKAGE};
use super::spec::{ActionSpec, RegistryOrigin};
use super::template::parse_template_yaml;

/// Produces the actions an origin provides.
pub trait ActionLoader: Send + Sync {
    fn load(&self, origin: &RegistryOrigin) -> impl Future<Output = Result<Vec<ActionSpec>, RegistryError>> + Send;
}

// ---------------------------------------------------------------------------
// Bundled
// ---------------------------------------------------------------------------

/// Loads the actions compiled into this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledLoader;

impl ActionLoader for BundledLoader {
    async fn load(&self, origin: &RegistryOrigin) -> Result<Vec<ActionSpec>, RegistryError> {
        match origin {
            RegistryOrigin::BundledPackage { name } if name == BUNDLED_PACKAGE => Ok(builtin::bundled_actions()),
            RegistryOrigin::BundledPackage { name } => {
                Err(RegistryError::load(origin, format!("unknown bundled package '{name}'")))
            }
            _ => Err(RegistryError::load(origin, "not a bundled package")),
        }
    }
}

// ---------------------------------------------------------------------------
// Template directory
// ---------------------------------------------------------------------------

/// Loads YAML template actions from a directory tree.
///
/// Loading is all-or-nothing: one invalid file fails the whole origin so a
/// half-loaded registry never replaces a working one.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateDirLoader;

impl TemplateDirLoader {
    /// Load every template under `dir`, attributing them to `origin`.
    ///
    /// Separate from [`ActionLoader::load`] so loaders that materialize
    /// another origin on disk (a git checkout) can reuse it.
    pub async fn load_dir(dir: &Path, origin: &RegistryOrigin) -> Result<Vec<ActionSpec>, RegistryError> {
        let files = collect_yaml_files(dir)
            .await
            .map_err(|e| RegistryError::load(origin, format!("{}: {e}", dir.display())))?;

        let mut specs = Vec::with_capacity(files.len());
        let mut seen = std::collections::BTreeSet::new();
        for path in files {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| RegistryError::load(origin, format!("{}: {e}", path.display())))?;
            let spec = parse_template_yaml(&text)
                .and_then(|def| def.into_spec(origin.clone()))
                .map_err(|e| RegistryError::load(origin, format!("{}: {e}", path.display())))?;
            if !seen.insert(spec.key.clone()) {
                return Err(RegistryError::load(
                    origin,
                    format!("{}: duplicate action '{}'", path.display(), spec.key),
                ));
            }
            tracing::debug!(key = %spec.key, path = %path.display(), "loaded template action");
            specs.push(spec);
        }
        Ok(specs)
    }
}

impl ActionLoader for TemplateDirLoader {
    async fn load(&self, origin: &RegistryOrigin) -> Result<Vec<ActionSpec>, RegistryError> {
        match origin {
            RegistryOrigin::LocalDirectory { path } => Self::load_dir(path, origin).await,
            _ => Err(RegistryError::load(origin, "not a local directory")),
        }
    }
}

/// Every `.yml`/`.yaml` file under `dir`, sorted by path.
async fn collect_yaml_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    pending.push(path);
                }
            } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yml" | "yaml")) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
