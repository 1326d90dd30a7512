//! ONNX Runtime sessions and model asset resolution.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A model file: its cache name and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub name: String,
    pub url: String,
}

impl ModelAsset {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// The four models the analyzer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSet {
    pub detector: ModelAsset,
    pub expression: ModelAsset,
    pub age: ModelAsset,
    pub gender: ModelAsset,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            detector: ModelAsset::new(
                "face_detection_yunet_2023mar.onnx",
                "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx",
            ),
            expression: ModelAsset::new(
                "emotion-ferplus-8.onnx",
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx",
            ),
            age: ModelAsset::new(
                "age_googlenet.onnx",
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/age_gender/models/age_googlenet.onnx",
            ),
            gender: ModelAsset::new(
                "gender_googlenet.onnx",
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/age_gender/models/gender_googlenet.onnx",
            ),
        }
    }
}

impl ModelSet {
    pub fn assets(&self) -> [&ModelAsset; 4] {
        [&self.detector, &self.expression, &self.age, &self.gender]
    }
}

/// Finds model files on disk, downloading them into the cache on first use.
///
/// Lookup order: cache directory, bundled directory, remote URL.
#[derive(Debug, Clone)]
pub struct ModelStore {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelStore {
    pub fn new(cache_dir: PathBuf, bundled_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            bundled_dir,
        }
    }

    /// Store rooted at the per-user cache directory.
    pub fn user(bundled_dir: Option<PathBuf>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "facecam")
            .ok_or_else(|| anyhow::anyhow!("could not determine cache directory"))?;
        Ok(Self::new(dirs.cache_dir().join("models"), bundled_dir))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of `asset` if it is already available locally.
    pub fn find(&self, asset: &ModelAsset) -> Option<PathBuf> {
        let cached = self.cache_dir.join(&asset.name);
        if cached.exists() {
            return Some(cached);
        }
        self.bundled_dir
            .as_ref()
            .map(|dir| dir.join(&asset.name))
            .filter(|p| p.exists())
    }

    pub fn resolve(&self, asset: &ModelAsset) -> Result<PathBuf> {
        if let Some(path) = self.find(asset) {
            log::debug!("model {} found at {}", asset.name, path.display());
            return Ok(path);
        }

        fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("creating {}", self.cache_dir.display()))?;
        let dest = self.cache_dir.join(&asset.name);
        log::info!("Downloading {} from {}", asset.name, asset.url);
        download(&asset.url, &dest)?;
        Ok(dest)
    }
}

fn download(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("fetching {}", url))?;
    let bytes = response
        .bytes()
        .with_context(|| format!("reading body of {}", url))?;

    // rename only once the file is complete
    let partial = dest.with_extension("part");
    let mut file =
        fs::File::create(&partial).with_context(|| format!("creating {}", partial.display()))?;
    file.write_all(&bytes)
        .and_then(|_| file.flush())
        .with_context(|| format!("writing {}", partial.display()))?;
    drop(file);
    fs::rename(&partial, dest).with_context(|| format!("moving model to {}", dest.display()))?;

    log::info!("Saved {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        use ort::ep::ExecutionProvider;
        let ep = ort::ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        use ort::ep::ExecutionProvider;
        let ep = ort::ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn load_session(store: &ModelStore, asset: &ModelAsset) -> Result<Session> {
    let path = store
        .resolve(asset)
        .with_context(|| format!("resolving model {}", asset.name))?;
    session_builder()?
        .commit_from_file(&path)
        .with_context(|| format!("loading model {}", path.display()))
}
