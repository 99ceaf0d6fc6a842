use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CiFetchError, Result};
use crate::process::{ProcessRunner, SpawnOptions};

/// Names the Bun executable can have inside a release archive.
const EXECUTABLE_NAMES: [&str; 2] = ["bun", "bun.exe"];

/// Command line of the platform's archive tool: overwrite, explicit destination.
pub fn extraction_command(archive: &Path, dest: &Path) -> Vec<String> {
    if cfg!(windows) {
        vec![
            "powershell".to_string(),
            "-NoProfile".to_string(),
            "-Command".to_string(),
            format!(
                "Expand-Archive -Force -LiteralPath {} -DestinationPath {}",
                powershell_quote(archive),
                powershell_quote(dest)
            ),
        ]
    } else {
        vec![
            "unzip".to_string(),
            "-o".to_string(),
            "-q".to_string(),
            archive.display().to_string(),
            "-d".to_string(),
            dest.display().to_string(),
        ]
    }
}

fn powershell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// Unpack `archive` into `dest` with the platform tool.
///
/// Falls back to the built-in decoder when the tool is not installed.
pub async fn extract_archive(runner: &ProcessRunner, archive: &Path, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let command = extraction_command(archive, dest);

    match runner.spawn_safe(&command, &SpawnOptions::new()).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            warn!("{} is not available, using built-in zip support", command[0]);
            let file = archive.display().to_string();
            let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
            tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
                .await
                .map_err(|e| CiFetchError::ArchiveExtraction {
                    file,
                    reason: e.to_string(),
                })??;
        }
        Err(e) => {
            return Err(CiFetchError::ArchiveExtraction {
                file: archive.display().to_string(),
                reason: e.to_string(),
            })
        }
    }

    Ok(dest.canonicalize()?)
}

/// Extract a zip archive with the `zip` crate.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let zip_error = |e: zip::result::ZipError| CiFetchError::ArchiveExtraction {
        file: archive_path.display().to_string(),
        reason: e.to_string(),
    };

    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_error)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_error)?;
        let Some(relative) = file.enclosed_name() else {
            debug!("Skipping unsafe entry {}", file.name());
            continue;
        };
        let outpath = dest_dir.join(relative);

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = fs::File::create(&outpath)?;
            io::copy(&mut file, &mut outfile)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// First file below `dir` named `bun` or `bun.exe`, case-insensitively.
pub fn find_executable(dir: &Path) -> Result<PathBuf> {
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_bun = entry.file_name().to_str().is_some_and(|name| {
            EXECUTABLE_NAMES
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
        });
        if is_bun {
            return Ok(entry.into_path());
        }
    }

    Err(CiFetchError::ExecutableNotFound {
        dir: dir.display().to_string(),
    })
}

/// Make a file executable (Unix only)
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Calculate SHA256 hash of a file
pub fn calculate_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
