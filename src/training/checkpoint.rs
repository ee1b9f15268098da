//! On-disk checkpoint artifacts for networks and optimizers.
//!
//! Every artifact lives directly under the run directory and is named only
//! from its key, so a run written by one process can be resumed by another:
//!
//! ```text
//! <checkpoints_dir>/<name>/net_epoch_<epoch>_id_<label>.pth
//! <checkpoints_dir>/<name>/opt_epoch_<epoch>_id_<label>.pth
//! ```
//!
//! Payloads are safetensors blobs of `f32` tensors, decoded onto the CPU.
//! Scalar optimizer state travels in the safetensors header metadata.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use safetensors::tensor::{SafeTensors, TensorView};
use safetensors::Dtype;

use crate::error::{ModelError, ModelResult};
use crate::tensor::{host_values, DType, StateDict, Tensor};

/// Prefix inserted in parameter names by data-parallel wrappers.
pub const MODULE_PREFIX: &str = "module.";

const ARTIFACT_EXTENSION: &str = ".pth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Net,
    Opt,
}

impl ArtifactKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Net => "net",
            ArtifactKind::Opt => "opt",
        }
    }
}

/// Composite key fully determining an artifact's file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub label: String,
    pub epoch: String,
}

impl ArtifactKey {
    pub fn network(label: &str, epoch: impl fmt::Display) -> Self {
        Self {
            kind: ArtifactKind::Net,
            label: label.to_string(),
            epoch: epoch.to_string(),
        }
    }

    pub fn optimizer(label: &str, epoch: impl fmt::Display) -> Self {
        Self {
            kind: ArtifactKind::Opt,
            label: label.to_string(),
            epoch: epoch.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_epoch_{}_id_{}{}",
            self.kind.prefix(),
            self.epoch,
            self.label,
            ARTIFACT_EXTENSION
        )
    }

    /// Inverse of [`ArtifactKey::file_name`]. The epoch ends at the first `_id_`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(ARTIFACT_EXTENSION)?;
        let (kind, rest) = if let Some(rest) = stem.strip_prefix("net_epoch_") {
            (ArtifactKind::Net, rest)
        } else if let Some(rest) = stem.strip_prefix("opt_epoch_") {
            (ArtifactKind::Opt, rest)
        } else {
            return None;
        };
        let (epoch, label) = rest.split_once("_id_")?;
        if epoch.is_empty() || label.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            label: label.to_string(),
            epoch: epoch.to_string(),
        })
    }
}

/// Tensors plus optional string metadata, as read back from an artifact.
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    pub tensors: StateDict,
    pub metadata: HashMap<String, String>,
}

/// Reads and writes artifacts under one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub fn exists(&self, key: &ArtifactKey) -> bool {
        self.path_for(key).exists()
    }

    /// Write an artifact, replacing any previous one with the same key.
    ///
    /// The run directory is created on first use. Data goes to a sibling
    /// temporary file that is renamed over the target, so readers never see
    /// a half-written artifact.
    pub fn save(
        &self,
        key: &ArtifactKey,
        tensors: &StateDict,
        metadata: HashMap<String, String>,
    ) -> ModelResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let bytes = encode_state(tensors, metadata)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", key.file_name()));
        if let Err(err) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        tracing::debug!("wrote {} tensors to {}", tensors.len(), path.display());
        Ok(path)
    }

    /// Read an artifact back.
    ///
    /// A missing file is reported as [`ModelError::CheckpointNotFound`] with
    /// the resolved path; there is no fallback.
    pub fn load(&self, key: &ArtifactKey) -> ModelResult<(PathBuf, Artifact)> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(ModelError::CheckpointNotFound { path });
        }
        let bytes = fs::read(&path)?;
        let artifact = decode_state(&bytes)?;
        Ok((path, artifact))
    }

    /// Keys of every artifact in the run directory, sorted by file name.
    pub fn list(&self) -> ModelResult<Vec<ArtifactKey>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        Ok(names.iter().filter_map(|n| ArtifactKey::parse(n)).collect())
    }

    /// Highest numeric epoch with at least one network artifact.
    pub fn latest_epoch(&self) -> ModelResult<Option<u64>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|k| k.kind == ArtifactKind::Net)
            .filter_map(|k| k.epoch.parse::<u64>().ok())
            .max())
    }
}

/// Rename every key starting with `prefix` to the remainder of the key.
/// Keys without the prefix are kept as they are.
pub fn strip_param_prefix(state: StateDict, prefix: &str) -> StateDict {
    state
        .into_iter()
        .map(|(key, tensor)| match key.strip_prefix(prefix) {
            Some(stripped) => (stripped.to_string(), tensor),
            None => (key, tensor),
        })
        .collect()
}

/// [`strip_param_prefix`] for the data-parallel `module.` prefix.
pub fn strip_module_prefix(state: StateDict) -> StateDict {
    strip_param_prefix(state, MODULE_PREFIX)
}

fn encode_state(tensors: &StateDict, metadata: HashMap<String, String>) -> ModelResult<Vec<u8>> {
    let mut buffers: Vec<(&str, Vec<usize>, Vec<u8>)> = Vec::with_capacity(tensors.len());
    for (key, tensor) in tensors {
        let (shape, values) = host_values(tensor)?;
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((key.as_str(), shape, bytes));
    }

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(buffers.len());
    for (key, shape, bytes) in &buffers {
        views.push((*key, TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }

    let info = if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    };
    Ok(safetensors::tensor::serialize(views, &info)?)
}

fn decode_state(bytes: &[u8]) -> ModelResult<Artifact> {
    let (_, header) = SafeTensors::read_metadata(bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();

    let tensors = SafeTensors::deserialize(bytes)?;
    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(ModelError::invalid_state(format!(
                "tensor {} has dtype {:?}, expected F32",
                name,
                view.dtype()
            )));
        }
        let tensor = Tensor::from_raw_buffer(
            view.data(),
            DType::F32,
            view.shape(),
            &candle_core::Device::Cpu,
        )?;
        state.insert(name, tensor);
    }

    Ok(Artifact {
        tensors: state,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::to_host;
    use candle_core::Device;

    fn sample_state() -> StateDict {
        let mut state = StateDict::new();
        state.insert(
            "conv0.weight".into(),
            Tensor::new(&[[0.1f32, -0.2, 0.3], [0.4, -0.5, 0.6]], &Device::Cpu).unwrap(),
        );
        state.insert(
            "conv0.bias".into(),
            Tensor::new(&[1.0f32, -1.0], &Device::Cpu).unwrap(),
        );
        state
    }

    fn zeros(n: usize) -> Tensor {
        Tensor::zeros(n, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            ArtifactKey::network("G", 5).file_name(),
            "net_epoch_5_id_G.pth"
        );
        assert_eq!(
            ArtifactKey::optimizer("D", "latest").file_name(),
            "opt_epoch_latest_id_D.pth"
        );
    }

    #[test]
    fn test_parse_file_names() {
        let key = ArtifactKey::parse("net_epoch_12_id_bg.pth").unwrap();
        assert_eq!(key, ArtifactKey::network("bg", 12));

        let key = ArtifactKey::parse("opt_epoch_3_id_G_ema.pth").unwrap();
        assert_eq!(key, ArtifactKey::optimizer("G_ema", 3));

        assert!(ArtifactKey::parse("net_epoch_3_id_G.bin").is_none());
        assert!(ArtifactKey::parse("model.safetensors").is_none());
        assert!(ArtifactKey::parse("net_epoch__id_G.pth").is_none());
    }

    #[test]
    fn test_save_creates_run_dir_and_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path().join("fresh-run"));
        let key = ArtifactKey::network("G", 5);

        let path = store.save(&key, &sample_state(), HashMap::new()).unwrap();
        assert_eq!(path, tmp.path().join("fresh-run/net_epoch_5_id_G.pth"));

        let (loaded_path, artifact) = store.load(&key).unwrap();
        assert_eq!(loaded_path, path);
        assert_eq!(
            to_host(&artifact.tensors).unwrap(),
            to_host(&sample_state()).unwrap()
        );
        assert!(artifact.metadata.is_empty());
    }

    #[test]
    fn test_metadata_survives() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let key = ArtifactKey::optimizer("G", 1);
        let mut metadata = HashMap::new();
        metadata.insert("lr".to_string(), "0.0002".to_string());

        store.save(&key, &StateDict::new(), metadata.clone()).unwrap();
        let (_, artifact) = store.load(&key).unwrap();
        assert_eq!(artifact.metadata, metadata);
        assert!(artifact.tensors.is_empty());
    }

    #[test]
    fn test_failed_save_leaves_no_temporary_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let key = ArtifactKey::network("G", 2);
        // a directory at the target path makes the final rename fail
        fs::create_dir_all(store.path_for(&key).join("occupied")).unwrap();

        assert!(matches!(
            store.save(&key, &sample_state(), HashMap::new()),
            Err(ModelError::Io(_))
        ));
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "left behind {:?}", leftovers);
    }

    #[test]
    fn test_missing_artifact_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        let key = ArtifactKey::network("G", 7);

        match store.load(&key) {
            Err(ModelError::CheckpointNotFound { path }) => {
                assert_eq!(path, store.path_for(&key));
            }
            other => panic!("expected CheckpointNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_list_and_latest_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        assert_eq!(store.latest_epoch().unwrap(), None);

        for epoch in [1, 10, 2] {
            store
                .save(&ArtifactKey::network("G", epoch), &sample_state(), HashMap::new())
                .unwrap();
        }
        store
            .save(&ArtifactKey::optimizer("G", 99), &sample_state(), HashMap::new())
            .unwrap();
        store
            .save(&ArtifactKey::network("G", "latest"), &sample_state(), HashMap::new())
            .unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let keys = store.list().unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(store.latest_epoch().unwrap(), Some(10));
    }

    #[test]
    fn test_strip_module_prefix() {
        let mut state = StateDict::new();
        state.insert("module.weight".into(), zeros(1));
        state.insert("bias".into(), zeros(1));
        state.insert("submodule.scale".into(), zeros(1));

        let stripped = strip_module_prefix(state);
        let keys: Vec<&str> = stripped.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["bias", "submodule.scale", "weight"]);
    }
}
