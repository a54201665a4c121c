//! Binary provisioning for the vector database
//!
//! This module makes sure a service executable exists on disk, downloading
//! and unpacking a release archive on first run.

use sha2::Digest;

pub mod binary_manager;
pub mod platform;

pub use binary_manager::BinaryProvisioner;
pub use platform::{Architecture, Platform, PlatformTriple};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default Qdrant release fetched on first run
pub const DEFAULT_QDRANT_VERSION: &str = "v1.12.4";

/// Release download base for Qdrant
pub const QDRANT_RELEASE_BASE: &str = "https://github.com/qdrant/qdrant/releases/download";

/// Where a provisioned binary comes from and where it must end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Remote archive URL
    pub url: String,
    /// Directory that receives the extracted binary
    pub install_dir: PathBuf,
    /// File name of the entry to pull out of the archive
    pub binary_name: String,
    /// Optional SHA-256 (lowercase hex) of the whole archive
    pub sha256: Option<String>,
}

impl DownloadTarget {
    pub fn new(url: impl Into<String>, install_dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            install_dir: install_dir.into(),
            binary_name: binary_name.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, checksum: impl Into<String>) -> Self {
        self.sha256 = Some(checksum.into().to_lowercase());
        self
    }

    /// Final expected binary path
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(&self.binary_name)
    }

    /// A target is inert once its binary is in place
    pub fn is_satisfied(&self) -> bool {
        self.binary_path().is_file()
    }

    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        ArchiveKind::from_url(&self.url)
    }
}

/// Qdrant release asset resolution
pub struct QdrantRelease;

impl QdrantRelease {
    /// Build the download target for the given version on the current host
    pub fn download_target(version: &str, install_dir: &Path) -> Result<DownloadTarget> {
        let triple = PlatformTriple::current().context("Unsupported host platform for Qdrant")?;
        Self::download_target_for(triple, version, install_dir)
    }

    pub fn download_target_for(
        triple: PlatformTriple,
        version: &str,
        install_dir: &Path,
    ) -> Result<DownloadTarget> {
        let target = triple
            .target_triple()
            .with_context(|| format!("No Qdrant release for {triple}"))?;
        let url = format!(
            "{QDRANT_RELEASE_BASE}/{version}/qdrant-{target}.{}",
            triple.platform.archive_extension()
        );

        Ok(DownloadTarget::new(
            url,
            install_dir,
            triple.platform.executable_name("qdrant"),
        ))
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if path.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

/// Progress of a running download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl ProvisionProgress {
    /// Fraction in `0.0..=1.0`, `None` when the server sent no length
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.downloaded as f64 / total as f64).min(1.0)),
        }
    }

    /// Human-readable progress text for status surfaces
    pub fn describe(&self) -> String {
        match self.fraction() {
            Some(fraction) => format!("{:.0}%", fraction * 100.0),
            None => format!("{:.1} MB", self.downloaded as f64 / (1024.0 * 1024.0)),
        }
    }
}

/// Result of binary acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryAcquisitionResult {
    /// Binary was already installed; no network access happened
    Existing(PathBuf),
    /// Binary was downloaded and installed in this run
    Downloaded(PathBuf),
}

impl BinaryAcquisitionResult {
    pub fn path(&self) -> &PathBuf {
        match self {
            BinaryAcquisitionResult::Existing(path) => path,
            BinaryAcquisitionResult::Downloaded(path) => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            BinaryAcquisitionResult::Existing(path) => path,
            BinaryAcquisitionResult::Downloaded(path) => path,
        }
    }

    pub fn was_downloaded(&self) -> bool {
        matches!(self, BinaryAcquisitionResult::Downloaded(_))
    }
}

/// Verify a file's SHA-256 against a lowercase hex digest
pub fn verify_checksum(path: &Path, expected_checksum: &str) -> Result<bool> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for checksum verification", path.display()))?;

    let mut hasher = sha2::Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {} for checksum", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    let actual_checksum = format!("{:x}", hasher.finalize());
    Ok(actual_checksum == expected_checksum.to_lowercase())
}

/// Make a file executable (no-op off Unix)
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = std::fs::metadata(path)
            .with_context(|| format!("Failed to get permissions of {}", path.display()))?
            .permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to set permissions of {}", path.display()))?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}
