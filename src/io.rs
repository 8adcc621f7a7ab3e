//! Flat numeric array files and other bincode-encoded artifacts.
//!
//! Arrays keep their shape on disk, so any `ndarray` dimensionality
//! round-trips. Files are written through a temporary sibling and renamed
//! into place.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array, Dimension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode `value` to `path`.
pub fn save_bincode<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        bincode::serialize_into(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

pub fn save_array<D: Dimension + Serialize>(path: &Path, array: &Array<f64, D>) -> Result<()> {
    save_bincode(path, array)?;
    tracing::debug!(path = %path.display(), shape = ?array.shape(), "saved array");
    Ok(())
}

pub fn load_array<D: Dimension + DeserializeOwned>(path: &Path) -> Result<Array<f64, D>> {
    let array: Array<f64, D> = load_bincode(path)?;
    tracing::debug!(path = %path.display(), shape = ?array.shape(), "loaded array");
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlignError;
    use ndarray::{array, Array1, Array3, Ix1, Ix2};

    #[test]
    fn test_array_files_keep_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.bin");
        let features = Array3::from_shape_fn((3, 2, 4), |(i, j, k)| (i * 8 + j * 4 + k) as f64);
        save_array(&path, &features).unwrap();
        let back: Array3<f64> = load_array(&path).unwrap();
        assert_eq!(back, features);
    }

    #[test]
    fn test_nested_directories_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("reward.bin");
        save_array(&path, &array![0.5, -0.5]).unwrap();
        let back: Array1<f64> = load_array(&path).unwrap();
        assert_eq!(back, array![0.5, -0.5]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_truncated_file_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normals.bin");
        save_array(&path, &array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(load_array::<Ix2>(&path).is_ok());
        std::fs::write(&path, [1u8, 2, 0]).unwrap();
        assert!(matches!(load_array::<Ix2>(&path), Err(AlignError::Codec(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_array::<Ix1>(&dir.path().join("nope.bin")), Err(AlignError::Io(_))));
    }
}
