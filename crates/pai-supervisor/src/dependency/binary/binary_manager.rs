//! Downloads and installs a service binary from a release archive
//!
//! The archive is streamed into a temporary file inside the install directory,
//! the matching entry is extracted into a second temporary file, and only that
//! finished file is renamed onto the final path. A failure at any step leaves
//! nothing at the final path.

use super::{
    make_executable, verify_checksum, ArchiveKind, BinaryAcquisitionResult, DownloadTarget,
    ProvisionProgress,
};
use crate::dependency::SupervisorError;
use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use reqwest::Client;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Longest silence tolerated between two body chunks
const DOWNLOAD_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Provisions executables described by a [`DownloadTarget`]
pub struct BinaryProvisioner {
    client: Client,
    service: String,
}

impl BinaryProvisioner {
    /// Create a provisioner reporting errors on behalf of `service`
    pub fn new(service: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("pai-supervisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client for provisioning")?;

        Ok(Self {
            client,
            service: service.into(),
        })
    }

    /// Ensure the binary exists, returning its final path
    pub async fn ensure(
        &self,
        target: &DownloadTarget,
        progress: &(dyn Fn(ProvisionProgress) + Send + Sync),
    ) -> Result<PathBuf, SupervisorError> {
        self.acquire(target, progress)
            .await
            .map(BinaryAcquisitionResult::into_path)
    }

    /// Like [`ensure`](Self::ensure) but reports whether a download happened
    pub async fn acquire(
        &self,
        target: &DownloadTarget,
        progress: &(dyn Fn(ProvisionProgress) + Send + Sync),
    ) -> Result<BinaryAcquisitionResult, SupervisorError> {
        let final_path = target.binary_path();

        if target.is_satisfied() {
            debug!(service = %self.service, path = %final_path.display(), "Binary already installed");
            return Ok(BinaryAcquisitionResult::Existing(final_path));
        }

        info!(
            service = %self.service,
            url = %target.url,
            path = %final_path.display(),
            "Binary missing, provisioning"
        );

        match self.download_and_install(target, progress).await {
            Ok(path) => {
                info!(service = %self.service, path = %path.display(), "Binary provisioned");
                Ok(BinaryAcquisitionResult::Downloaded(path))
            }
            Err(e) => {
                warn!(service = %self.service, error = %format!("{e:#}"), "Provisioning failed");
                Err(SupervisorError::ProvisioningFailed {
                    service: self.service.clone(),
                    source: e,
                })
            }
        }
    }

    async fn download_and_install(
        &self,
        target: &DownloadTarget,
        progress: &(dyn Fn(ProvisionProgress) + Send + Sync),
    ) -> Result<PathBuf> {
        let kind = target
            .archive_kind()
            .with_context(|| format!("Unsupported archive format: {}", target.url))?;

        tokio::fs::create_dir_all(&target.install_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create install directory: {}",
                    target.install_dir.display()
                )
            })?;

        let archive = NamedTempFile::new_in(&target.install_dir)
            .context("Failed to create temporary archive file")?;
        let downloaded = self.download_archive(target, &archive, progress).await?;
        debug!(service = %self.service, bytes = downloaded, "Archive downloaded");

        if let Some(expected) = &target.sha256 {
            if !verify_checksum(archive.path(), expected)? {
                return Err(anyhow!("Archive checksum mismatch, expected {expected}"));
            }
        }

        let install_dir = target.install_dir.clone();
        let binary_name = target.binary_name.clone();
        let final_path = target.binary_path();

        tokio::task::spawn_blocking(move || {
            install_from_archive(archive, kind, &install_dir, &binary_name, &final_path)
        })
        .await
        .context("Extraction task panicked")?
    }

    /// Stream the archive body into `archive`, returning the byte count
    async fn download_archive(
        &self,
        target: &DownloadTarget,
        archive: &NamedTempFile,
        progress: &(dyn Fn(ProvisionProgress) + Send + Sync),
    ) -> Result<u64> {
        let mut response = self
            .client
            .get(&target.url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", target.url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to download {}: HTTP {}",
                target.url,
                response.status()
            ));
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::from_std(
            archive
                .reopen()
                .context("Failed to open temporary archive file")?,
        );
        let mut downloaded = 0u64;
        progress(ProvisionProgress { downloaded, total });

        loop {
            let chunk = tokio::time::timeout(DOWNLOAD_STALL_TIMEOUT, response.chunk())
                .await
                .map_err(|_| anyhow!("Download stalled for {}s", DOWNLOAD_STALL_TIMEOUT.as_secs()))?
                .context("Failed to read archive body")?;

            let Some(chunk) = chunk else { break };
            file.write_all(&chunk)
                .await
                .context("Failed to write archive to disk")?;
            downloaded += chunk.len() as u64;
            progress(ProvisionProgress { downloaded, total });
        }

        file.flush().await.context("Failed to flush archive")?;

        if let Some(total) = total {
            if downloaded != total {
                return Err(anyhow!(
                    "Incomplete archive: received {downloaded} of {total} bytes"
                ));
            }
        }

        Ok(downloaded)
    }
}

/// Extract `binary_name` from `archive` and move it onto `final_path`
fn install_from_archive(
    archive: NamedTempFile,
    kind: ArchiveKind,
    install_dir: &Path,
    binary_name: &str,
    final_path: &Path,
) -> Result<PathBuf> {
    let mut staged =
        NamedTempFile::new_in(install_dir).context("Failed to create temporary binary file")?;

    let mut source = archive
        .reopen()
        .context("Failed to reopen downloaded archive")?;
    source.seek(SeekFrom::Start(0))?;

    let found = match kind {
        ArchiveKind::TarGz => extract_tar_gz(source, binary_name, staged.as_file_mut())?,
        ArchiveKind::Zip => extract_zip(source, binary_name, staged.as_file_mut())?,
    };
    if !found {
        return Err(anyhow!("Archive does not contain '{binary_name}'"));
    }

    staged.as_file().sync_all().context("Failed to sync binary")?;
    make_executable(staged.path())?;

    staged
        .persist(final_path)
        .map_err(|e| anyhow::Error::new(e.error))
        .with_context(|| format!("Failed to move binary into {}", final_path.display()))?;

    Ok(final_path.to_path_buf())
}

/// Copy the first regular file named `binary_name` (any depth) into `out`
pub(crate) fn extract_tar_gz(
    reader: impl Read,
    binary_name: &str,
    out: &mut std::fs::File,
) -> Result<bool> {
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive.entries().context("Corrupt tar.gz archive")? {
        let mut entry = entry.context("Corrupt tar.gz entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let is_target = entry
            .path()
            .context("Invalid path in tar.gz archive")?
            .file_name()
            .is_some_and(|name| name == binary_name);
        if is_target {
            std::io::copy(&mut entry, out).context("Failed to extract binary from tar.gz")?;
            return Ok(true);
        }
    }

    Ok(false)
}

/// Zip counterpart of [`extract_tar_gz`]
pub(crate) fn extract_zip(
    reader: impl Read + Seek,
    binary_name: &str,
    out: &mut std::fs::File,
) -> Result<bool> {
    use zip::ZipArchive;

    let mut archive = ZipArchive::new(reader).context("Corrupt zip archive")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("Corrupt zip entry")?;
        if !file.is_file() {
            continue;
        }

        let Some(path) = file.enclosed_name() else {
            continue;
        };
        if path.file_name().is_some_and(|name| name == binary_name) {
            std::io::copy(&mut file, out).context("Failed to extract binary from zip")?;
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn tar_gz_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (path, data) in entries {
            writer
                .start_file(*path, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn read_back(mut file: std::fs::File) -> Vec<u8> {
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        contents
    }

    #[test]
    fn test_extract_tar_gz_nested_entry() {
        let bytes = tar_gz_with(&[
            ("README.md", b"readme"),
            ("qdrant-1.12.4/bin/qdrant", b"#!/bin/sh\necho qdrant\n"),
        ]);
        let mut out = tempfile::tempfile().unwrap();

        let found = extract_tar_gz(bytes.as_slice(), "qdrant", &mut out).unwrap();
        assert!(found);
        assert_eq!(read_back(out), b"#!/bin/sh\necho qdrant\n");
    }

    #[test]
    fn test_extract_tar_gz_missing_entry() {
        let bytes = tar_gz_with(&[("qdrant-config.yaml", b"storage: {}")]);
        let mut out = tempfile::tempfile().unwrap();

        assert!(!extract_tar_gz(bytes.as_slice(), "qdrant", &mut out).unwrap());
    }

    #[test]
    fn test_extract_corrupt_tar_gz_errors() {
        let mut out = tempfile::tempfile().unwrap();
        assert!(extract_tar_gz(&b"definitely not gzip"[..], "qdrant", &mut out).is_err());
    }

    #[test]
    fn test_extract_zip_entry() {
        let bytes = zip_with(&[("LICENSE", b"apache"), ("dist/qdrant.exe", b"MZ")]);
        let mut out = tempfile::tempfile().unwrap();

        let found = extract_zip(std::io::Cursor::new(bytes), "qdrant.exe", &mut out).unwrap();
        assert!(found);
        assert_eq!(read_back(out), b"MZ");
    }

    #[test]
    fn test_install_from_archive_leaves_nothing_on_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let mut archive = NamedTempFile::new_in(temp_dir.path()).unwrap();
        archive
            .write_all(&tar_gz_with(&[("other", b"x")]))
            .unwrap();
        let final_path = temp_dir.path().join("qdrant");

        let result = install_from_archive(
            archive,
            ArchiveKind::TarGz,
            temp_dir.path(),
            "qdrant",
            &final_path,
        );

        assert!(result.is_err());
        assert!(!final_path.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_existing_binary_skips_network() {
        let temp_dir = TempDir::new().unwrap();
        // Unroutable URL: any network access would fail the test
        let target = DownloadTarget::new("http://127.0.0.1:9/qdrant.tar.gz", temp_dir.path(), "qdrant");
        std::fs::write(target.binary_path(), b"bin").unwrap();

        let provisioner = BinaryProvisioner::new("qdrant").unwrap();
        let result = provisioner.acquire(&target, &|_| {}).await.unwrap();

        assert_eq!(result, BinaryAcquisitionResult::Existing(target.binary_path()));
    }

    #[tokio::test]
    async fn test_unsupported_archive_is_provisioning_failure() {
        let temp_dir = TempDir::new().unwrap();
        let target = DownloadTarget::new("http://127.0.0.1:9/qdrant.rar", temp_dir.path(), "qdrant");

        let provisioner = BinaryProvisioner::new("qdrant").unwrap();
        let err = provisioner.ensure(&target, &|_| {}).await.unwrap_err();

        assert!(matches!(err, SupervisorError::ProvisioningFailed { .. }));
        assert!(!target.binary_path().exists());
    }
}
