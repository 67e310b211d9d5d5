//! Filesystem-backed model provisioning.
//!
//! Model assets are directories under the models dir (one per asset, named
//! after it). Provisioning "unpacks" the asset into the cache dir under the
//! request's cache key and tags the copy with a marker file naming the
//! asset, so a later request for the same asset reuses it and a request
//! for a different asset replaces it.

use crate::error::{EarshotError, Result};
use crate::models::{Model, ModelProvider, ProvisionCallback, ProvisionRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

/// Marker file written into an unpacked model directory.
const ASSET_MARKER: &str = ".earshot-asset";

/// Get the directory where model assets are stored.
///
/// Uses `~/.local/share/earshot/models/` on Linux/Unix.
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("earshot")
        .join("models")
}

/// Get the directory models are unpacked into.
///
/// Uses `~/.cache/earshot/` on Linux/Unix.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("earshot")
}

/// List asset names available in `dir`, sorted.
pub fn list_assets(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.path().is_dir() {
                return None;
            }
            entry.file_name().to_str().map(str::to_string)
        })
        .collect();

    names.sort();
    names
}

/// A model unpacked on disk.
#[derive(Debug)]
pub struct LocalModel {
    name: String,
    path: PathBuf,
    released: AtomicBool,
}

impl LocalModel {
    /// Directory holding the unpacked model files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `release` has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Model for LocalModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn release(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!(model = %self.name, "Released model");
        }
        Ok(())
    }
}

/// Provider that unpacks asset directories from disk on a background thread.
#[derive(Debug, Clone)]
pub struct LocalModelProvider {
    models_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Default for LocalModelProvider {
    fn default() -> Self {
        Self::new(models_dir(), cache_dir())
    }
}

impl LocalModelProvider {
    pub fn new(models_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Unpack `request` synchronously.
    pub fn unpack(&self, request: &ProvisionRequest) -> Result<LocalModel> {
        let source = self.models_dir.join(&request.asset_id);
        if !source.is_dir() {
            return Err(EarshotError::ModelNotFound {
                asset_id: request.asset_id.clone(),
                path: source.display().to_string(),
            });
        }

        let target = self.cache_dir.join(&request.cache_key);
        let marker = target.join(ASSET_MARKER);

        let cached = fs::read_to_string(&marker)
            .map(|tag| tag.trim() == request.asset_id)
            .unwrap_or(false);

        if cached {
            debug!(asset = %request.asset_id, path = %target.display(), "Reusing unpacked model");
        } else {
            if target.exists() {
                warn!(path = %target.display(), "Replacing stale model cache");
                fs::remove_dir_all(&target)?;
            }
            copy_dir(&source, &target).map_err(|e| EarshotError::ProvisionFailed {
                message: format!("Failed to unpack {}: {}", request.asset_id, e),
            })?;
            fs::write(&marker, &request.asset_id)?;
            info!(asset = %request.asset_id, path = %target.display(), "Unpacked model");
        }

        Ok(LocalModel {
            name: request.asset_id.clone(),
            path: target,
            released: AtomicBool::new(false),
        })
    }
}

impl ModelProvider for LocalModelProvider {
    fn provision(&self, request: ProvisionRequest, done: ProvisionCallback) {
        let provider = self.clone();
        thread::spawn(move || {
            let result = provider
                .unpack(&request)
                .map(|model| Arc::new(model) as Arc<dyn Model>);
            done(result);
        });
    }
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&path, &dest)?;
        } else {
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
