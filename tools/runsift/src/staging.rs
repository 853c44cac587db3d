use crate::analysis::analyze_log;
use crate::errors::RunsiftError;
use crate::runtime::FileSystem;
use std::path::{Path, PathBuf};

const PATH_HOSTILE: [char; 10] = [' ', '/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Empties `dir`, creating it when missing. Items that cannot be removed are
/// returned as warnings and left in place.
pub fn clear_output_dir(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<String>, RunsiftError> {
    if !fs.exists(dir) {
        fs.create_dir_all(dir)?;
        return Ok(Vec::new());
    }
    let mut warnings = Vec::new();
    for item in fs.list_dir(dir)? {
        let removed = if fs.is_dir(&item) {
            fs.remove_dir_all(&item)
        } else {
            fs.remove_file(&item)
        };
        if let Err(err) = removed {
            let name = item
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| item.display().to_string());
            warnings.push(format!("Could not delete {name}: {err}"));
        }
    }
    Ok(warnings)
}

pub fn safe_job_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if PATH_HOSTILE.contains(&ch) {
                '_'
            } else {
                ch
            }
        })
        .collect()
}

pub fn job_log_path(dir: &Path, job_id: u64, job_name: &str) -> PathBuf {
    dir.join(format!("job_{job_id}_{}.txt", safe_job_name(job_name)))
}

pub fn artifact_dir(log_dir: &Path, run_id: u64) -> PathBuf {
    log_dir.join(format!("run_{run_id}_artifacts"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedLog {
    pub path: PathBuf,
    /// Whether the summary reported anything beyond the fallback text.
    pub has_failures: bool,
}

/// Writes the error summary followed by the untouched log. An existing file is
/// replaced.
pub fn write_annotated_log(
    fs: &dyn FileSystem,
    dir: &Path,
    job_id: u64,
    job_name: &str,
    log: &str,
) -> Result<SavedLog, RunsiftError> {
    fs.create_dir_all(dir)?;
    let path = job_log_path(dir, job_id, job_name);
    let analysis = analyze_log(log);
    let mut annotated = analysis.render();
    annotated.push_str(log);
    fs.write_string(&path, &annotated)?;
    Ok(SavedLog {
        path,
        has_failures: analysis.has_failures(),
    })
}

#[cfg(test)]
mod tests {
    use super::{artifact_dir, clear_output_dir, job_log_path, safe_job_name, write_annotated_log};
    use crate::runtime::{FakeFileSystem, FileSystem};
    use std::path::{Path, PathBuf};

    #[test]
    fn job_names_become_file_safe() {
        assert_eq!(safe_job_name("build / test (ubuntu)"), "build___test_(ubuntu)");
        assert_eq!(safe_job_name(r#"a\b:c*d?e"f<g>h|i"#), "a_b_c_d_e_f_g_h_i");
        assert_eq!(
            job_log_path(Path::new("/logs"), 12, "e2e tests"),
            PathBuf::from("/logs/job_12_e2e_tests.txt")
        );
        assert_eq!(
            artifact_dir(Path::new("/logs"), 9),
            PathBuf::from("/logs/run_9_artifacts")
        );
    }

    #[test]
    fn clearing_creates_missing_directory() {
        let fs = FakeFileSystem::default();
        let warnings = clear_output_dir(&fs, Path::new("/logs")).expect("clear");
        assert!(warnings.is_empty());
        assert!(fs.is_dir(Path::new("/logs")));
    }

    #[test]
    fn clearing_removes_files_and_directories() {
        let fs = FakeFileSystem::default();
        fs.create_dir_all(Path::new("/logs/run_1_artifacts")).expect("mkdir");
        fs.write_string(Path::new("/logs/run_1_artifacts/a.log"), "a")
            .expect("write");
        fs.write_string(Path::new("/logs/job_1_build.txt"), "b")
            .expect("write");

        let warnings = clear_output_dir(&fs, Path::new("/logs")).expect("clear");

        assert!(warnings.is_empty());
        assert!(fs.file_paths().is_empty());
        assert!(fs.is_dir(Path::new("/logs")));
        assert!(!fs.is_dir(Path::new("/logs/run_1_artifacts")));
    }

    #[test]
    fn undeletable_items_are_warnings() {
        let fs = FakeFileSystem::default();
        fs.create_dir_all(Path::new("/logs")).expect("mkdir");
        fs.write_string(Path::new("/logs/locked.txt"), "x").expect("write");
        fs.write_string(Path::new("/logs/stale.txt"), "y").expect("write");
        fs.lock_path("/logs/locked.txt");

        let warnings = clear_output_dir(&fs, Path::new("/logs")).expect("clear");

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Could not delete locked.txt:"));
        assert_eq!(fs.file_paths(), vec![PathBuf::from("/logs/locked.txt")]);
    }

    #[test]
    fn annotated_log_starts_with_summary() {
        let fs = FakeFileSystem::default();
        let log = "##[group]Run tests\n##[error]Process completed with exit code 1.\n";
        let saved = write_annotated_log(&fs, Path::new("/logs"), 3, "unit", log).expect("write");

        assert!(saved.has_failures);
        let written = fs.file(&saved.path).expect("file");
        assert!(written.starts_with(&"=".repeat(80)));
        assert!(written.ends_with(log));
        assert!(written.contains("  • Run tests"));
    }

    #[test]
    fn clean_log_is_saved_without_failures() {
        let fs = FakeFileSystem::default();
        let saved = write_annotated_log(&fs, Path::new("/logs"), 4, "lint", "All good\n")
            .expect("write");
        assert!(!saved.has_failures);
        assert!(fs
            .file(&saved.path)
            .expect("file")
            .contains("No explicit errors detected in log format."));
    }
}
