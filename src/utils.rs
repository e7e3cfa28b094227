use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Expand files and directories into a sorted list of image paths.
///
/// Directories contribute their direct children with a known image
/// extension; files are taken as given.
pub fn collect_image_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_image(path))
                .collect::<Vec<_>>();
            found.sort();
            debug!("{} image(s) in {}", found.len(), input.display());
            paths.extend(found);
        } else if input.is_file() {
            paths.push(input.clone());
        } else {
            return Err(eyre!("no such file or directory: {}", input.display()));
        }
    }

    if paths.is_empty() {
        return Err(eyre!("no images found"));
    }
    info!("Using {} still image(s)", paths.len());
    Ok(paths)
}

/// Write `bytes` next to the other captures as `<stem>-<sequence>.jpg`.
pub fn save_capture(dir: &Path, stem: &str, sequence: u64, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}-{sequence:06}.jpg"));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_expand_to_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.PNG", "a.jpg", "notes.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let paths = collect_image_paths(&[dir.path().to_path_buf()]).unwrap();
        let names = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.jpg", "b.PNG", "c.jpeg"]);
    }

    #[test]
    fn missing_inputs_are_errors() {
        assert!(collect_image_paths(&[PathBuf::from("/no/such/label.jpg")]).is_err());
        let empty = tempfile::tempdir().unwrap();
        assert!(collect_image_paths(&[empty.path().to_path_buf()]).is_err());
    }

    #[test]
    fn captures_are_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_capture(dir.path(), "label", 42, b"jpeg").unwrap();
        assert_eq!(path.file_name().unwrap(), "label-000042.jpg");
        assert_eq!(std::fs::read(path).unwrap(), b"jpeg");
    }
}
