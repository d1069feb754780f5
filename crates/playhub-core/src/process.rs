//! OS process-list polling and install-directory executable enumeration.
//!
//! The session watcher only needs one question answered: is any of the
//! game's candidate executables still in the process list? The seam is a
//! trait so tests drive the watcher with a fake.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use tokio::process::Command;

/// Source of currently running process names (lowercased file names).
pub trait ProcessLister: Send + Sync {
    fn running_names(
        &self,
    ) -> impl std::future::Future<Output = io::Result<HashSet<String>>> + Send;
}

/// Shells out to the platform process-list command.
pub struct SystemProcessLister;

impl ProcessLister for SystemProcessLister {
    async fn running_names(&self) -> io::Result<HashSet<String>> {
        let output = process_list_command().output().await?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "process list command exited with {}",
                output.status
            )));
        }
        Ok(parse_process_names(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(target_os = "windows")]
fn process_list_command() -> Command {
    let mut cmd = Command::new("tasklist");
    cmd.args(["/fo", "csv", "/nh"]);
    cmd
}

#[cfg(not(target_os = "windows"))]
fn process_list_command() -> Command {
    let mut cmd = Command::new("ps");
    cmd.args(["-axo", "comm="]);
    cmd
}

/// Pull lowercased process file names out of the command output. Works for
/// both the csv tasklist shape and plain ps lines.
fn parse_process_names(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            // tasklist csv: "name.exe","1234",...
            let name = if let Some(rest) = line.strip_prefix('"') {
                rest.split('"').next()?
            } else {
                line
            };
            // ps prints full paths for some processes.
            let name = name.rsplit(['/', '\\']).next()?;
            Some(name.to_lowercase())
        })
        .collect()
}

/// Candidate executable file names (lowercased) under an install directory,
/// one level of subdirectories deep. Inaccessible directories yield an
/// empty set, which the watcher treats as "cannot identify the process".
pub fn scan_executables(install_dir: &Path) -> HashSet<String> {
    let mut found = HashSet::new();
    collect_executables(install_dir, 0, &mut found);
    found
}

fn collect_executables(dir: &Path, depth: usize, found: &mut HashSet<String>) {
    if depth > 1 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_executables(&path, depth + 1, found);
            continue;
        }
        if is_executable(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.insert(name.to_lowercase());
            }
        }
    }
}

#[cfg(target_os = "windows")]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exe"))
}

#[cfg(not(target_os = "windows"))]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    if path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exe"))
    {
        return true;
    }
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_output() {
        let names = parse_process_names("systemd\n/usr/bin/foo-game\nbash\n\n");
        assert!(names.contains("systemd"));
        assert!(names.contains("foo-game"));
        assert!(names.contains("bash"));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_parse_tasklist_csv_output() {
        let output = "\"Foo.exe\",\"1234\",\"Console\",\"1\",\"10,000 K\"\n\
                      \"steam.exe\",\"99\",\"Console\",\"1\",\"5 K\"";
        let names = parse_process_names(output);
        assert!(names.contains("foo.exe"));
        assert!(names.contains("steam.exe"));
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        assert!(scan_executables(Path::new("/nonexistent/playhub-test")).is_empty());
    }
}
