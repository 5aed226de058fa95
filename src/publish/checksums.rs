//! SHA-256 checksum manifest.

use crate::error::{PublishError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    /// Asset name
    pub name: String,
    /// Hex SHA-256
    pub sha256: String,
}

/// Checksums of every artifact file, sorted by asset name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumManifest {
    /// Hash every file in `paths`. Directories contribute each file beneath them.
    pub async fn compute(paths: &[PathBuf]) -> Result<Self> {
        let paths = paths.to_vec();
        tokio::task::spawn_blocking(move || Self::compute_blocking(&paths))
            .await
            .map_err(|e| PublishError::Checksum {
                path: PathBuf::new(),
                reason: format!("checksum task failed: {}", e),
            })?
    }

    fn compute_blocking(paths: &[PathBuf]) -> Result<Self> {
        let mut entries = Vec::new();
        for path in paths {
            if path.is_dir() {
                for entry in WalkDir::new(path).sort_by_file_name() {
                    let entry = entry.map_err(|e| PublishError::Checksum {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                    if entry.file_type().is_file() {
                        entries.push(hash_entry(entry.path())?);
                    }
                }
            } else {
                entries.push(hash_entry(path)?);
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { entries })
    }

    /// Entries in manifest order
    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    /// Whether the manifest covers no files
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `"<hex>  <name>"` lines, as `sha256sum` prints them
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{}  {}\n", e.sha256, e.name))
            .collect()
    }

    /// Write the manifest to `path`
    pub async fn write(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.render())
            .await
            .map_err(|e| PublishError::Checksum {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        log::info!("Wrote checksum manifest {} ({} file(s))", path.display(), self.entries.len());
        Ok(())
    }
}

fn hash_entry(path: &Path) -> Result<ChecksumEntry> {
    let fail = |reason: String| PublishError::Checksum {
        path: path.to_path_buf(),
        reason,
    };

    let mut file = std::fs::File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| fail(e.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| fail("path has no file name".to_string()))?;

    Ok(ChecksumEntry {
        name,
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manifest_is_sorted_sha256sum_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let windows = dir.path().join("Spyder-Windows-x86_64.exe");
        let linux = dir.path().join("Spyder-Linux-x86_64.sh");
        std::fs::write(&windows, b"").expect("write");
        std::fs::write(&linux, b"abc").expect("write");

        let manifest = ChecksumManifest::compute(&[windows, linux]).await.expect("manifest");
        assert_eq!(
            manifest.render(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  Spyder-Linux-x86_64.sh\n\
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  Spyder-Windows-x86_64.exe\n"
        );
    }

    #[tokio::test]
    async fn directories_contribute_their_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("bundle/nested")).expect("mkdir");
        std::fs::write(dir.path().join("bundle/a.bin"), b"a").expect("write");
        std::fs::write(dir.path().join("bundle/nested/b.bin"), b"b").expect("write");

        let manifest = ChecksumManifest::compute(&[dir.path().join("bundle")])
            .await
            .expect("manifest");
        let names: Vec<_> = manifest.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }

    #[tokio::test]
    async fn missing_file_is_a_checksum_error() {
        let err = ChecksumManifest::compute(&[PathBuf::from("/nonexistent/Spyder.pkg")])
            .await
            .expect_err("missing");
        assert_eq!(err.kind(), "publish");
    }
}
