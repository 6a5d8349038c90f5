//! Stores policies as safetensors files.
//!
//! The weight matrix is kept as a single `F32` tensor and the hyperparameters
//! travel as JSON inside the file's metadata. The normalizer is not persisted.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};
use safetensors::{Dtype, SafeTensors, serialize_to_file, tensor::TensorView};

use crate::{
    MlErr, Result,
    policy::{Hyperparams, Policy},
};

/// Appended to the user supplied prefix to name the policy file.
pub const POLICY_SUFFIX: &str = "_policy.safetensors";

const WEIGHTS_TENSOR: &str = "weights";
const HYPERPARAMS_KEY: &str = "hyperparams";

/// Builds the policy file path for `prefix`.
pub fn policy_path(prefix: impl AsRef<Path>) -> PathBuf {
    let mut path = prefix.as_ref().as_os_str().to_owned();
    path.push(POLICY_SUFFIX);
    PathBuf::from(path)
}

impl Policy {
    /// Writes the weights and hyperparameters to `<prefix>_policy.safetensors`.
    ///
    /// # Arguments
    /// * `prefix` - The path prefix of the policy file.
    ///
    /// # Returns
    /// The written path or an error if failed to do so.
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<PathBuf> {
        let path = policy_path(prefix);

        let weights = self.weights.as_standard_layout();
        let values = weights
            .as_slice()
            .ok_or_else(|| MlErr::Format("weights are not contiguous".into()))?;

        let shape = vec![self.weights.nrows(), self.weights.ncols()];
        let view = TensorView::new(Dtype::F32, shape, bytemuck::cast_slice(values))?;

        let hyperparams = serde_json::to_string(&self.hyperparams)?;
        let metadata = HashMap::from([(HYPERPARAMS_KEY.to_string(), hyperparams)]);

        serialize_to_file([(WEIGHTS_TENSOR, &view)], &Some(metadata), &path)?;
        info!(path:? = path; "policy saved");
        Ok(path)
    }

    /// Restores the weights and hyperparameters from `<prefix>_policy.safetensors`.
    ///
    /// The dimensions of this policy are replaced by the stored ones and the
    /// sampling rng is reseeded from the stored seed.
    ///
    /// # Arguments
    /// * `prefix` - The path prefix of the policy file.
    ///
    /// # Returns
    /// An error if the file can't be read or is malformed.
    pub fn load(&mut self, prefix: impl AsRef<Path>) -> Result<()> {
        let path = policy_path(prefix);
        let bytes = fs::read(&path)?;

        let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
        let raw = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(HYPERPARAMS_KEY))
            .ok_or_else(|| MlErr::Format(format!("missing `{HYPERPARAMS_KEY}` metadata")))?;

        let hyperparams: Hyperparams = serde_json::from_str(raw)?;
        hyperparams.validate()?;

        let tensors = SafeTensors::deserialize(&bytes)?;
        let tensor = tensors.tensor(WEIGHTS_TENSOR)?;

        if tensor.dtype() != Dtype::F32 {
            return Err(MlErr::Format(format!(
                "expected F32 weights, got {:?}",
                tensor.dtype()
            )));
        }

        let &[rows, cols] = tensor.shape() else {
            return Err(MlErr::Format(format!(
                "expected a matrix, got shape {:?}",
                tensor.shape()
            )));
        };

        // Safetensors data is little endian and not necessarily aligned.
        let values = tensor
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        self.weights = Array2::from_shape_vec((rows, cols), values)?;
        self.rng = StdRng::seed_from_u64(hyperparams.seed);
        self.hyperparams = hyperparams;

        info!(path:? = path; "policy loaded");
        Ok(())
    }
}
