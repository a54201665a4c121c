//! Host platform detection for release asset selection

use std::env;

/// Operating system platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
}

impl Platform {
    /// Get the current platform, if it is one we ship binaries for
    pub fn current() -> Option<Self> {
        match env::consts::OS {
            "linux" => Some(Platform::Linux),
            "macos" => Some(Platform::MacOS),
            "windows" => Some(Platform::Windows),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOS => "darwin",
            Platform::Windows => "windows",
        }
    }

    /// Executable file name on this platform
    pub fn executable_name(&self, stem: &str) -> String {
        match self {
            Platform::Windows => format!("{stem}.exe"),
            _ => stem.to_string(),
        }
    }

    /// Archive extension used by release assets on this platform
    pub fn archive_extension(&self) -> &'static str {
        match self {
            Platform::Windows => "zip",
            _ => "tar.gz",
        }
    }
}

/// CPU architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    pub fn current() -> Option<Self> {
        match env::consts::ARCH {
            "x86_64" => Some(Architecture::X86_64),
            "aarch64" => Some(Architecture::Aarch64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
        }
    }
}

/// Platform and architecture combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTriple {
    pub platform: Platform,
    pub architecture: Architecture,
}

impl PlatformTriple {
    pub fn new(platform: Platform, architecture: Architecture) -> Self {
        Self {
            platform,
            architecture,
        }
    }

    /// Get the current platform triple, `None` on unsupported hosts
    pub fn current() -> Option<Self> {
        Some(Self::new(Platform::current()?, Architecture::current()?))
    }

    /// Rust-style target triple as used in Qdrant release asset names
    pub fn target_triple(&self) -> Option<&'static str> {
        match (self.platform, self.architecture) {
            (Platform::Linux, Architecture::X86_64) => Some("x86_64-unknown-linux-gnu"),
            (Platform::Linux, Architecture::Aarch64) => Some("aarch64-unknown-linux-musl"),
            (Platform::MacOS, Architecture::X86_64) => Some("x86_64-apple-darwin"),
            (Platform::MacOS, Architecture::Aarch64) => Some("aarch64-apple-darwin"),
            (Platform::Windows, Architecture::X86_64) => Some("x86_64-pc-windows-msvc"),
            (Platform::Windows, Architecture::Aarch64) => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for PlatformTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.architecture, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Platform::Linux, Architecture::X86_64, Some("x86_64-unknown-linux-gnu"))]
    #[case(Platform::MacOS, Architecture::Aarch64, Some("aarch64-apple-darwin"))]
    #[case(Platform::Windows, Architecture::X86_64, Some("x86_64-pc-windows-msvc"))]
    #[case(Platform::Windows, Architecture::Aarch64, None)]
    fn test_target_triple(
        #[case] platform: Platform,
        #[case] arch: Architecture,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(PlatformTriple::new(platform, arch).target_triple(), expected);
    }

    #[test]
    fn test_executable_name() {
        assert_eq!(Platform::Windows.executable_name("qdrant"), "qdrant.exe");
        assert_eq!(Platform::Linux.executable_name("qdrant"), "qdrant");
        assert_eq!(Platform::Windows.archive_extension(), "zip");
        assert_eq!(Platform::MacOS.archive_extension(), "tar.gz");
    }
}
