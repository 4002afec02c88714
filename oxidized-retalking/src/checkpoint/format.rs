use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use candle_core::pickle::{read_pth_tensor_info, Object, PthTensors, Stack};
use candle_core::{Device, Tensor};
use zip::ZipArchive;

static PICKLE_FILE: &str = "data.pkl";
static SAFETENSORS_EXTENSION: &str = "safetensors";

/// Checkpoint serialization formats.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckpointFormat {
    /// PyTorch zip/pickle checkpoint (`.pth`, `.pt`, `.bin`, ...).
    PyTorch,

    /// Flat safetensors checkpoint.
    SafeTensors,
}

impl CheckpointFormat {
    /// Guess the checkpoint format from the file extension.
    ///
    /// Anything that is not a safetensors file is assumed to be a PyTorch
    /// checkpoint.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path.as_ref().extension() {
            Some(ext) if ext == SAFETENSORS_EXTENSION => CheckpointFormat::SafeTensors,
            _ => CheckpointFormat::PyTorch,
        }
    }
}

/// Top-level structure of a PyTorch checkpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct PyTorchLayout {
    /// Keys of the nested mappings, in checkpoint order.
    pub sections: Vec<String>,

    /// Whether the top-level mapping has entries that may be tensors.
    pub has_tensors: bool,
}

impl PyTorchLayout {
    /// Check if the checkpoint has a nested mapping under `key`.
    pub fn has_section(&self, key: &str) -> bool {
        self.sections.iter().any(|section| section == key)
    }
}

/// Read the top-level structure of a PyTorch checkpoint.
///
/// Only the pickled object is read, tensor storage is not touched.
pub(crate) fn read_pytorch_layout(path: &Path) -> Result<PyTorchLayout, candle_core::Error> {
    let file = BufReader::new(File::open(path)?);
    let mut zip = ZipArchive::new(file).map_err(candle_core::Error::wrap)?;
    let pickle_name = zip
        .file_names()
        .find(|name| name.ends_with(PICKLE_FILE))
        .map(str::to_owned)
        .ok_or_else(|| candle_core::Error::Msg(format!("Checkpoint has no {PICKLE_FILE}")))?;

    let mut reader = BufReader::new(
        zip.by_name(&pickle_name)
            .map_err(candle_core::Error::wrap)?,
    );
    let mut stack = Stack::empty();
    stack.read_loop(&mut reader)?;

    let mut layout = PyTorchLayout::default();
    if let Object::Dict(entries) = stack.finalize()? {
        for (key, value) in entries {
            match (key, value) {
                (Object::Unicode(key), Object::Dict(_)) => layout.sections.push(key),
                (_, Object::Reduce { .. } | Object::Build { .. }) => layout.has_tensors = true,
                _ => {}
            }
        }
    }

    Ok(layout)
}

/// Read the tensors of a PyTorch checkpoint.
///
/// If `key` is given, the tensors are read from the mapping stored under
/// that key in the top-level mapping. Entries that are not tensors (such
/// as nested mappings or training metadata) are skipped. Tensors are
/// returned in checkpoint order.
pub(crate) fn read_pytorch(
    path: &Path,
    key: Option<&str>,
    device: &Device,
) -> Result<Vec<(String, Tensor)>, candle_core::Error> {
    // We need to read the tensor metadata separately as PthTensors
    // does not expose this information.
    let tensor_names: Vec<String> = read_pth_tensor_info(path, false, key)?
        .into_iter()
        .map(|ti| ti.name)
        .collect();

    let pth = PthTensors::new(path, key)?;
    let mut tensors = Vec::with_capacity(tensor_names.len());
    for name in tensor_names {
        let tensor = pth
            .get(&name)?
            .ok_or_else(|| candle_core::Error::CannotFindTensor { path: name.clone() })?;
        tensors.push((name, tensor.to_device(device)?));
    }

    Ok(tensors)
}

/// Read the tensors of a safetensors checkpoint.
///
/// Safetensors headers are unordered, tensors are returned sorted by name.
pub(crate) fn read_safetensors(
    path: &Path,
    device: &Device,
) -> Result<Vec<(String, Tensor)>, candle_core::Error> {
    let mut tensors = candle_core::safetensors::load(path, device)?
        .into_iter()
        .collect::<Vec<_>>();
    tensors.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use candle_core::Device;
    use rstest::rstest;

    use super::{read_pytorch, read_pytorch_layout, CheckpointFormat};
    use crate::util::tests::testdata;

    #[rstest]
    #[case("checkpoints/LNet.pth", CheckpointFormat::PyTorch)]
    #[case("checkpoints/DNet.pt", CheckpointFormat::PyTorch)]
    #[case("checkpoints/ENet.safetensors", CheckpointFormat::SafeTensors)]
    #[case("checkpoints/ENet", CheckpointFormat::PyTorch)]
    fn format_from_extension(#[case] path: &str, #[case] format: CheckpointFormat) {
        assert_eq!(CheckpointFormat::from_path(path), format);
    }

    #[test]
    fn layout_lists_nested_mappings() {
        let layout = read_pytorch_layout(&testdata("LNet.pth")).unwrap();
        assert_eq!(layout.sections, vec!["state_dict", "optimizer"]);
        assert!(layout.has_section("state_dict"));
        assert!(!layout.has_section("net_G_ema"));
        assert!(!layout.has_tensors);

        let layout = read_pytorch_layout(&testdata("arcface_model.pth")).unwrap();
        assert!(layout.sections.is_empty());
        assert!(layout.has_tensors);
    }

    #[test]
    fn pytorch_tensors_keep_checkpoint_order() {
        let tensors = read_pytorch(&testdata("LNet.pth"), Some("state_dict"), &Device::Cpu).unwrap();
        let names = tensors.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "module.core.weight",
                "module.core.bias",
                "module.low_res.core.weight"
            ]
        );
        assert_eq!(
            tensors[1].1.to_vec1::<f32>().unwrap(),
            vec![0.5, 1.5, 2.5, 3.5]
        );
    }

    #[test]
    fn metadata_is_not_read_as_tensors() {
        // `epoch` and `optimizer` are the only other top-level entries.
        let tensors = read_pytorch(&testdata("LNet.pth"), None, &Device::Cpu).unwrap();
        assert!(tensors.is_empty());
    }

    #[test]
    fn missing_storage_is_an_error() {
        assert!(read_pytorch_layout(&testdata("LNet_truncated.pth")).is_ok());
        assert!(read_pytorch(
            &testdata("LNet_truncated.pth"),
            Some("state_dict"),
            &Device::Cpu
        )
        .is_err());
    }

    #[test]
    fn non_zip_file_has_no_layout() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        assert!(read_pytorch_layout(&path).is_err());
    }
}
