use crate::errors::RunsiftError;
use crate::github::GithubClient;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use crate::staging::artifact_dir;
use crate::types::Artifact;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// Entry names as stored in the bundle.
    Extracted { dir: PathBuf, files: Vec<String> },
    Expired,
    Failed(String),
}

/// Downloads one artifact bundle and unpacks it under
/// `<log_dir>/run_<run_id>_artifacts/`.
pub fn download_artifact(
    client: &GithubClient<'_>,
    fs: &dyn FileSystem,
    log_dir: &Path,
    run_id: u64,
    artifact: &Artifact,
) -> ArtifactOutcome {
    append_run_log(
        "info",
        "artifact.download.started",
        json!({
            "run_id": run_id,
            "artifact_id": artifact.id,
            "name": artifact.name,
            "size_in_bytes": artifact.size_in_bytes
        }),
    );
    let bytes = match client.download_artifact(artifact.id) {
        Ok(bytes) => bytes,
        Err(err) if err.http_status() == Some(410) => return ArtifactOutcome::Expired,
        Err(err) => return failed(artifact, err),
    };
    if let Err(err) = verify_digest(&bytes, artifact.digest.as_deref()) {
        return failed(artifact, err);
    }
    let dir = artifact_dir(log_dir, run_id);
    match extract_zip(fs, &dir, &bytes) {
        Ok(files) => {
            append_run_log(
                "info",
                "artifact.download.extracted",
                json!({
                    "run_id": run_id,
                    "artifact_id": artifact.id,
                    "dir": dir.display().to_string(),
                    "entries": files.len()
                }),
            );
            ArtifactOutcome::Extracted { dir, files }
        }
        Err(err) => failed(artifact, err),
    }
}

fn failed(artifact: &Artifact, err: RunsiftError) -> ArtifactOutcome {
    append_run_log(
        "warn",
        "artifact.download.failed",
        json!({
            "artifact_id": artifact.id,
            "name": artifact.name,
            "error": err.to_string()
        }),
    );
    ArtifactOutcome::Failed(err.to_string())
}

/// Checks `bytes` against a `sha256:<hex>` digest. Other digest schemes are
/// not checked.
pub fn verify_digest(bytes: &[u8], digest: Option<&str>) -> Result<(), RunsiftError> {
    let Some(expected) = digest.and_then(|value| value.strip_prefix("sha256:")) else {
        return Ok(());
    };
    let actual = format!("{:x}", Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(RunsiftError::Artifact(format!(
            "digest mismatch: expected sha256:{expected}, got sha256:{actual}"
        )))
    }
}

/// Unpacks every entry into `dir`. Nothing is written when an entry would
/// land outside `dir`.
pub fn extract_zip(
    fs: &dyn FileSystem,
    dir: &Path,
    bytes: &[u8],
) -> Result<Vec<String>, RunsiftError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RunsiftError::Artifact(format!("not a valid zip file: {e}")))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| RunsiftError::Artifact(e.to_string()))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            RunsiftError::Artifact(format!("entry escapes extraction dir: {}", entry.name()))
        })?;
        entries.push((index, entry.name().to_string(), relative, entry.is_dir()));
    }

    fs.create_dir_all(dir)?;
    let mut names = Vec::with_capacity(entries.len());
    for (index, name, relative, is_dir) in entries {
        let target = dir.join(relative);
        if is_dir {
            fs.create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs.create_dir_all(parent)?;
            }
            let mut entry = archive
                .by_index(index)
                .map_err(|e| RunsiftError::Artifact(e.to_string()))?;
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| RunsiftError::Artifact(format!("{name}: {e}")))?;
            fs.write_bytes(&target, &contents)?;
        }
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::{download_artifact, extract_zip, verify_digest, ArtifactOutcome};
    use crate::config::{AppConfig, Credentials, RepoRef};
    use crate::github::GithubClient;
    use crate::runtime::{FakeClock, FakeFileSystem, FakeHttpTransport, HttpResponse};
    use crate::types::Artifact;
    use sha2::{Digest, Sha256};
    use std::io::{Cursor, Write};
    use std::path::{Path, PathBuf};
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn bundle(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, body) in entries {
            writer.start_file(*name, options).expect("start");
            writer.write_all(body.as_bytes()).expect("write");
        }
        writer.finish().expect("finish").into_inner()
    }

    fn artifact(digest: Option<String>) -> Artifact {
        Artifact {
            id: 77,
            name: "server-logs".to_string(),
            size_in_bytes: 10,
            expired: false,
            created_at: None,
            digest,
        }
    }

    fn zip_response(bytes: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/zip".to_string())],
            body: bytes,
        }
    }

    #[test]
    fn extracts_nested_entries() {
        let fs = FakeFileSystem::default();
        let bytes = bundle(&[("uvicorn.log", "started"), ("cache/v/lastfailed", "{}")]);

        let names = extract_zip(&fs, Path::new("/logs/run_1_artifacts"), &bytes).expect("extract");

        assert_eq!(names, vec!["uvicorn.log", "cache/v/lastfailed"]);
        assert_eq!(
            fs.file("/logs/run_1_artifacts/uvicorn.log").as_deref(),
            Some("started")
        );
        assert_eq!(
            fs.file("/logs/run_1_artifacts/cache/v/lastfailed").as_deref(),
            Some("{}")
        );
    }

    #[test]
    fn rejects_entries_that_escape_the_directory() {
        let fs = FakeFileSystem::default();
        let bytes = bundle(&[("ok.txt", "fine"), ("../../etc/passwd", "nope")]);

        assert!(extract_zip(&fs, Path::new("/logs/run_1_artifacts"), &bytes).is_err());
        assert!(fs.file_paths().is_empty());
    }

    #[test]
    fn garbage_is_not_a_zip() {
        let fs = FakeFileSystem::default();
        let err = extract_zip(&fs, Path::new("/logs/x"), b"definitely not zip").expect_err("bad");
        assert!(err.to_string().contains("not a valid zip file"));
    }

    #[test]
    fn digest_must_match_when_present() {
        let bytes = b"payload";
        let good = format!("sha256:{:x}", Sha256::digest(bytes));
        assert!(verify_digest(bytes, Some(&good)).is_ok());
        assert!(verify_digest(bytes, None).is_ok());
        assert!(verify_digest(bytes, Some("md5:abc")).is_ok());
        assert!(verify_digest(bytes, Some("sha256:00")).is_err());
    }

    #[test]
    fn download_follows_redirect_and_extracts() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        let fs = FakeFileSystem::default();
        let bytes = bundle(&[("uvicorn.log", "boot")]);
        let digest = format!("sha256:{:x}", Sha256::digest(&bytes));
        http.push_redirect("https://productionresultssa.blob.core.windows.net/a.zip?sv=1");
        http.push_response(Ok(zip_response(bytes)));
        let repo = RepoRef {
            owner: "octo".to_string(),
            repo: "widgets".to_string(),
        };
        let creds = Credentials {
            token: "t".to_string(),
        };
        let client = GithubClient::new(&http, &clock, &cfg, repo, &creds);

        let outcome = download_artifact(&client, &fs, Path::new("/logs"), 5, &artifact(Some(digest)));

        assert_eq!(
            outcome,
            ArtifactOutcome::Extracted {
                dir: PathBuf::from("/logs/run_5_artifacts"),
                files: vec!["uvicorn.log".to_string()],
            }
        );
        assert_eq!(fs.file("/logs/run_5_artifacts/uvicorn.log").as_deref(), Some("boot"));
    }

    #[test]
    fn gone_means_expired() {
        let http = FakeHttpTransport::default();
        let clock = FakeClock::default();
        let cfg = AppConfig::default();
        let fs = FakeFileSystem::default();
        http.push_json(410, r#"{"message": "Artifact has expired"}"#);
        let repo = RepoRef {
            owner: "octo".to_string(),
            repo: "widgets".to_string(),
        };
        let creds = Credentials {
            token: "t".to_string(),
        };
        let client = GithubClient::new(&http, &clock, &cfg, repo, &creds);

        let outcome = download_artifact(&client, &fs, Path::new("/logs"), 5, &artifact(None));
        assert_eq!(outcome, ArtifactOutcome::Expired);
    }
}
