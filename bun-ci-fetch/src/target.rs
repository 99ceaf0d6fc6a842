//! Platform target parsing and normalization.
//!
//! Accepts loose, human or pipeline supplied strings such as `linux-x64`,
//! `bun-darwin-arm64`, `x86_64-pc-windows-msvc` or `Linux-AMD64-musl-baseline`
//! and normalizes them into a [`Target`] with a canonical label
//! (`os-arch[-abi][-baseline][-profile]`).

use std::fmt;
use std::str::FromStr;

use crate::error::{CiFetchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Darwin,
    Linux,
    Windows,
}

impl Os {
    pub fn as_str(self) -> &'static str {
        match self {
            Os::Darwin => "darwin",
            Os::Linux => "linux",
            Os::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Aarch64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    Musl,
}

impl Abi {
    pub fn as_str(self) -> &'static str {
        match self {
            Abi::Musl => "musl",
        }
    }
}

/// A normalized build target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub os: Os,
    pub arch: Arch,
    pub abi: Option<Abi>,
    /// Only ever set for [`Arch::X64`].
    pub baseline: bool,
    pub profile: bool,
    label: String,
}

impl Target {
    pub fn new(os: Os, arch: Arch, abi: Option<Abi>, baseline: bool, profile: bool) -> Self {
        let baseline = baseline && arch == Arch::X64;

        let mut label = format!("{}-{}", os.as_str(), arch.as_str());
        if let Some(abi) = abi {
            label.push('-');
            label.push_str(abi.as_str());
        }
        if baseline {
            label.push_str("-baseline");
        }
        if profile {
            label.push_str("-profile");
        }

        Self {
            os,
            arch,
            abi,
            baseline,
            profile,
            label,
        }
    }

    /// Parse a free-form platform string.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.to_ascii_lowercase();
        let invalid = |part| CiFetchError::InvalidTarget {
            input: input.to_string(),
            part,
        };

        // "darwin" contains "win", so darwin must be tested first.
        let os = if ["darwin", "apple", "mac"].iter().any(|p| lower.contains(p)) {
            Os::Darwin
        } else if lower.contains("linux") {
            Os::Linux
        } else if lower.contains("win") {
            Os::Windows
        } else {
            return Err(invalid("operating system"));
        };

        let arch = if ["x64", "amd64", "x86_64"].iter().any(|p| lower.contains(p)) {
            Arch::X64
        } else if ["arm64", "aarch64"].iter().any(|p| lower.contains(p)) {
            Arch::Aarch64
        } else {
            return Err(invalid("architecture"));
        };

        let abi = lower.contains("-musl").then_some(Abi::Musl);

        Ok(Self::new(
            os,
            arch,
            abi,
            lower.contains("-baseline"),
            lower.contains("-profile"),
        ))
    }

    /// The target of the running host.
    pub fn current() -> Result<Self> {
        let os = match std::env::consts::OS {
            "macos" => Os::Darwin,
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            other => {
                return Err(CiFetchError::InvalidTarget {
                    input: other.to_string(),
                    part: "operating system",
                })
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Aarch64,
            other => {
                return Err(CiFetchError::InvalidTarget {
                    input: other.to_string(),
                    part: "architecture",
                })
            }
        };
        let abi = cfg!(target_env = "musl").then_some(Abi::Musl);

        Ok(Self::new(os, arch, abi, false, false))
    }

    /// Canonical `os-arch[-abi][-baseline][-profile]` label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Name of the release archive for this target.
    pub fn archive_name(&self) -> String {
        format!("bun-{}.zip", self.label)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl FromStr for Target {
    type Err = CiFetchError;

    fn from_str(s: &str) -> Result<Self> {
        Target::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(input: &str) -> String {
        Target::parse(input).unwrap().label().to_string()
    }

    #[test]
    fn test_parse_canonical_labels() {
        assert_eq!(label("linux-x64"), "linux-x64");
        assert_eq!(label("darwin-aarch64"), "darwin-aarch64");
        assert_eq!(label("windows-x64-baseline"), "windows-x64-baseline");
        assert_eq!(label("linux-aarch64-musl"), "linux-aarch64-musl");
        assert_eq!(label("linux-x64-musl-baseline-profile"), "linux-x64-musl-baseline-profile");
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(label("x86_64-apple-darwin"), "darwin-x64");
        assert_eq!(label("aarch64-apple-darwin"), "darwin-aarch64");
        assert_eq!(label("macOS-ARM64"), "darwin-aarch64");
        assert_eq!(label("x86_64-pc-windows-msvc"), "windows-x64");
        assert_eq!(label("Linux-AMD64"), "linux-x64");
        assert_eq!(label("bun-linux-arm64"), "linux-aarch64");
    }

    #[test]
    fn test_darwin_is_not_windows() {
        let target = Target::parse("darwin-x64").unwrap();
        assert_eq!(target.os, Os::Darwin);
    }

    #[test]
    fn test_flag_order_is_normalized() {
        assert_eq!(label("linux-x64-profile-baseline"), "linux-x64-baseline-profile");
        assert_eq!(label("linux-x64-baseline-musl"), "linux-x64-musl-baseline");
    }

    #[test]
    fn test_baseline_only_for_x64() {
        let target = Target::parse("linux-aarch64-baseline").unwrap();
        assert!(!target.baseline);
        assert_eq!(target.label(), "linux-aarch64");
    }

    #[test]
    fn test_invalid_targets() {
        let err = Target::parse("freebsd-x64").unwrap_err();
        assert!(err.to_string().contains("operating system"));
        assert!(err.to_string().contains("freebsd-x64"));

        let err = Target::parse("linux-riscv64").unwrap_err();
        assert!(err.to_string().contains("architecture"));
    }

    #[test]
    fn test_archive_name_and_display() {
        let target: Target = "windows-x64-baseline".parse().unwrap();
        assert_eq!(target.archive_name(), "bun-windows-x64-baseline.zip");
        assert_eq!(target.to_string(), "windows-x64-baseline");
    }

    #[test]
    fn test_current_target_round_trips() {
        if let Ok(current) = Target::current() {
            assert_eq!(Target::parse(current.label()).unwrap(), current);
        }
    }
}
