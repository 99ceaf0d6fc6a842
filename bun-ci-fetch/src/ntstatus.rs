//! Translation of Windows exit codes into NTSTATUS symbolic names.
//!
//! Processes killed by the OS on Windows (access violations, stack overflows,
//! aborted DLL initialisation...) exit with large NTSTATUS values such as
//! `3221225477`. The Windows SDK ships `ntstatus.h`, which maps each value to
//! a `STATUS_*` name that is far easier to diagnose from a CI log.

use regex::RegexBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Find the `STATUS_*` name defined for `code` in the contents of `ntstatus.h`.
pub fn lookup(header: &str, code: u32) -> Option<String> {
    let pattern = format!(r"(STATUS_\w+).*0x0*{code:x}L?\b");
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()?;

    re.captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Locate `ntstatus.h` under a Windows Kits installation directory.
///
/// Kit versions (`10`, `8.1`) and include versions (`10.0.22621.0`) are both
/// searched newest first.
pub fn locate_header(kits_dir: &Path) -> Option<PathBuf> {
    for kit in sorted_versions(kits_dir) {
        let include_dir = kit.join("Include");
        for version in sorted_versions(&include_dir) {
            let header = version.join("shared").join("ntstatus.h");
            if header.is_file() {
                return Some(header);
            }
        }
    }
    None
}

/// Subdirectories whose names look like version numbers, newest first.
fn sorted_versions(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut versions: Vec<(Vec<u64>, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let parts = name
                .split('.')
                .map(|part| part.parse::<u64>().ok())
                .collect::<Option<Vec<_>>>()?;
            Some((parts, entry.path()))
        })
        .collect();

    versions.sort_by(|a, b| b.0.cmp(&a.0));
    versions.into_iter().map(|(_, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HEADER: &str = r#"
#define STATUS_WAIT_0                    ((NTSTATUS)0x00000000L)
#define STATUS_ACCESS_VIOLATION          ((NTSTATUS)0xC0000005L)
#define STATUS_IN_PAGE_ERROR             ((NTSTATUS)0xC0000006L)
#define STATUS_STACK_OVERFLOW            ((NTSTATUS)0xC00000FDL)
#define STATUS_DLL_INIT_FAILED           ((NTSTATUS)0xC0000142L)
"#;

    #[test]
    fn test_lookup_known_codes() {
        assert_eq!(
            lookup(HEADER, 0xC0000005).as_deref(),
            Some("STATUS_ACCESS_VIOLATION")
        );
        assert_eq!(
            lookup(HEADER, 3221225725).as_deref(),
            Some("STATUS_STACK_OVERFLOW")
        );
        assert_eq!(
            lookup(HEADER, 0xC0000142).as_deref(),
            Some("STATUS_DLL_INIT_FAILED")
        );
    }

    #[test]
    fn test_lookup_does_not_match_prefix() {
        // 0xC000000 is a prefix of 0xC0000005 but not a defined status.
        assert_eq!(lookup(HEADER, 0xC000000), None);
    }

    #[test]
    fn test_lookup_unknown_code() {
        assert_eq!(lookup(HEADER, 1), None);
        assert_eq!(lookup("", 0xC0000005), None);
    }

    #[test]
    fn test_locate_header_prefers_newest() {
        let kits = tempdir().unwrap();
        for version in ["10.0.19041.0", "10.0.22621.0"] {
            let shared = kits.path().join("10").join("Include").join(version).join("shared");
            fs::create_dir_all(&shared).unwrap();
            fs::write(shared.join("ntstatus.h"), HEADER).unwrap();
        }
        fs::create_dir_all(kits.path().join("Debuggers")).unwrap();

        let header = locate_header(kits.path()).unwrap();
        assert!(header.to_string_lossy().contains("10.0.22621.0"));
    }

    #[test]
    fn test_locate_header_missing() {
        let kits = tempdir().unwrap();
        assert_eq!(locate_header(kits.path()), None);
        assert_eq!(locate_header(Path::new("/no/such/kits")), None);
    }
}
