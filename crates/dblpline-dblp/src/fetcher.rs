//! Local release cache
//!
//! Artifacts are stored under the cache root by remote basename. A cached
//! archive is only trusted after its MD5 matches the published side-file,
//! and that check re-runs on every call.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dblpline_core::integrity::{compute_checksum, fetch_remote_checksum, verify};
use dblpline_core::{
    PipelineError, SharedProgress, Sleeper, TokioSleeper, download_to_file, part_path,
    retry_with_backoff,
};
use flate2::read::GzDecoder;

use crate::catalog::{ReleaseArtifact, ReleaseCatalog};

/// A local file mirroring a remote artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub local_path: PathBuf,
    pub source_url: String,
    /// Checksum matched the published digest during this run
    pub verified: bool,
}

/// Everything needed to load one release
#[derive(Debug, Clone)]
pub struct PreparedRelease {
    pub release: ReleaseArtifact,
    pub archive: CacheEntry,
    pub schema: Option<CacheEntry>,
    /// Decompressed XML, co-located with the schema
    pub xml_path: PathBuf,
}

/// Snapshot of [`ReleaseFetcher`] activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounts {
    pub downloaded: usize,
    pub cached_hits: usize,
    pub verify_failed: usize,
}

#[derive(Default)]
struct FetchStats {
    downloaded: AtomicUsize,
    cached_hits: AtomicUsize,
    verify_failed: AtomicUsize,
}

pub struct ReleaseFetcher {
    cache_dir: PathBuf,
    progress: SharedProgress,
    sleeper: Arc<dyn Sleeper>,
    stats: FetchStats,
}

impl ReleaseFetcher {
    /// Fails when the cache root cannot be created.
    pub fn new(cache_dir: impl Into<PathBuf>, progress: SharedProgress) -> io::Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            progress,
            sleeper: Arc::new(TokioSleeper),
            stats: FetchStats::default(),
        })
    }

    /// Replace the back-off clock.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn local_path(&self, artifact: &ReleaseArtifact) -> PathBuf {
        self.cache_dir.join(artifact.filename())
    }

    pub fn stats(&self) -> FetchCounts {
        FetchCounts {
            downloaded: self.stats.downloaded.load(Ordering::Relaxed),
            cached_hits: self.stats.cached_hits.load(Ordering::Relaxed),
            verify_failed: self.stats.verify_failed.load(Ordering::Relaxed),
        }
    }

    /// Return a verified local copy of `artifact`, downloading when the
    /// cached file is missing or does not match the published digest.
    pub async fn ensure_artifact(
        &self,
        artifact: &ReleaseArtifact,
    ) -> Result<CacheEntry, PipelineError> {
        let label = artifact.filename();
        let expected = retry_with_backoff(label, self.sleeper.as_ref(), || {
            fetch_remote_checksum(&artifact.url)
        })
        .await?;

        let path = self.local_path(artifact);
        if path.is_file() {
            let actual = checksum_blocking(&path).await?;
            if verify(&actual, &expected) {
                log::info!("{label}: cached copy verified");
                self.stats.cached_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(CacheEntry {
                    local_path: path,
                    source_url: artifact.url.clone(),
                    verified: true,
                });
            }
            log::warn!("{label}: cached copy does not match {expected}, re-downloading");
        }

        self.download(artifact, &path).await?;

        let actual = checksum_blocking(&path).await?;
        if !verify(&actual, &expected) {
            self.stats.verify_failed.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::Integrity {
                path,
                expected,
                actual,
            });
        }

        self.stats.downloaded.fetch_add(1, Ordering::Relaxed);
        Ok(CacheEntry {
            local_path: path,
            source_url: artifact.url.clone(),
            verified: true,
        })
    }

    /// Schema side-files publish no digest: reuse a non-empty local copy.
    pub async fn ensure_schema(
        &self,
        artifact: &ReleaseArtifact,
    ) -> Result<CacheEntry, PipelineError> {
        let path = self.local_path(artifact);
        let present = std::fs::metadata(&path).is_ok_and(|m| m.is_file() && m.len() > 0);
        if present {
            self.stats.cached_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.download(artifact, &path).await?;
            self.stats.downloaded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(CacheEntry {
            local_path: path,
            source_url: artifact.url.clone(),
            verified: false,
        })
    }

    /// Path of the decompressed archive, decompressing on first use.
    pub fn ensure_decompressed(&self, entry: &CacheEntry) -> Result<PathBuf, PipelineError> {
        ensure_decompressed(entry)
    }

    /// Schema, then archive, then decompression for the `skip`-th latest release.
    pub async fn ensure_release(
        &self,
        catalog: &ReleaseCatalog,
        skip: usize,
    ) -> Result<PreparedRelease, PipelineError> {
        let release = catalog.resolve_latest(".xml.gz", skip).await?;
        log::info!("Release: {}", release.filename());

        let schema = match catalog.resolve_latest(".dtd", skip).await {
            Ok(artifact) => Some(self.ensure_schema(&artifact).await?),
            Err(PipelineError::NotFound(msg)) => {
                log::warn!("No schema published ({msg}), named entities will not resolve");
                None
            }
            Err(e) => return Err(e),
        };

        let archive = self.ensure_artifact(&release).await?;
        let entry = archive.clone();
        let xml_path = tokio::task::spawn_blocking(move || ensure_decompressed(&entry))
            .await
            .map_err(|e| PipelineError::Io(io::Error::other(e)))??;

        Ok(PreparedRelease {
            release,
            archive,
            schema,
            xml_path,
        })
    }

    async fn download(&self, artifact: &ReleaseArtifact, dest: &Path) -> Result<u64, PipelineError> {
        let label = artifact.filename();
        // A `.part` left by an interrupted run is never resumed
        let stale = part_path(dest);
        if stale.exists() {
            log::debug!("{label}: removing stale {}", stale.display());
            std::fs::remove_file(&stale)?;
        }

        let pb = self.progress.download_bar(label);
        log::info!("{label}: downloading {}", artifact.url);
        let bytes = retry_with_backoff(label, self.sleeper.as_ref(), || {
            download_to_file(&artifact.url, dest, &pb)
        })
        .await?;
        pb.finish_and_clear();
        log::info!("{label}: {bytes} bytes");
        Ok(bytes)
    }
}

async fn checksum_blocking(path: &Path) -> Result<String, PipelineError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_checksum(&path))
        .await
        .map_err(|e| PipelineError::Io(io::Error::other(e)))?
        .map_err(PipelineError::Io)
}

/// `dblp-2021-11-01.xml.gz` → `dblp-2021-11-01.xml`; non-gzip paths map to themselves.
pub fn decompressed_path(archive: &Path) -> PathBuf {
    match archive.extension() {
        Some(ext) if ext == "gz" => archive.with_extension(""),
        _ => archive.to_path_buf(),
    }
}

/// Decompress a verified archive next to itself.
///
/// Output goes to `<name>.tmp` and is renamed into place after the decoder
/// reaches the end, so an existing sibling is always complete.
pub fn ensure_decompressed(entry: &CacheEntry) -> Result<PathBuf, PipelineError> {
    let target = decompressed_path(&entry.local_path);
    if target == entry.local_path || target.is_file() {
        return Ok(target);
    }
    if !entry.verified {
        return Err(PipelineError::Integrity {
            path: entry.local_path.clone(),
            expected: "verified archive".to_string(),
            actual: "unverified".to_string(),
        });
    }

    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = target.with_file_name(tmp_name);

    log::info!(
        "Decompressing {} -> {}",
        entry.local_path.display(),
        target.display()
    );
    let result = (|| -> io::Result<u64> {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&entry.local_path)?));
        let mut out = BufWriter::new(File::create(&tmp)?);
        let n = io::copy(&mut decoder, &mut out)?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(n)
    })();

    match result {
        Ok(n) => {
            std::fs::rename(&tmp, &target)?;
            log::debug!("Decompressed {n} bytes");
            Ok(target)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(PipelineError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dblpline_core::ProgressContext;
    use dblpline_core::integrity::compute_checksum;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAYLOAD: &[u8] = b"release payload bytes";

    fn md5_of(bytes: &[u8]) -> String {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("x");
        std::fs::write(&p, bytes).unwrap();
        compute_checksum(&p).unwrap()
    }

    fn artifact(server: &MockServer, name: &str) -> ReleaseArtifact {
        ReleaseArtifact {
            url: format!("{}/release/{name}", server.uri()),
            kind: crate::catalog::ArtifactKind::from_filename(name),
            order_key: name.to_string(),
        }
    }

    fn fetcher(dir: &TempDir) -> ReleaseFetcher {
        ReleaseFetcher::new(dir.path(), Arc::new(ProgressContext::hidden())).unwrap()
    }

    async fn mount_checksum(server: &MockServer, name: &str, digest: &str, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}.md5")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{digest}  {name}\n")))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn second_call_is_cache_hit() {
        let server = MockServer::start().await;
        let name = "dblp-2021-11-01.xml.gz";
        mount_checksum(&server, name, &md5_of(PAYLOAD), 2).await;
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PAYLOAD))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let f = fetcher(&dir);
        let a = artifact(&server, name);
        let first = f.ensure_artifact(&a).await.unwrap();
        let second = f.ensure_artifact(&a).await.unwrap();
        assert_eq!(first, second);
        assert!(second.verified);
        assert_eq!(
            f.stats(),
            FetchCounts {
                downloaded: 1,
                cached_hits: 1,
                verify_failed: 0
            }
        );
    }

    #[tokio::test]
    async fn mismatched_local_copy_is_redownloaded() {
        let server = MockServer::start().await;
        let name = "dblp-2021-11-01.xml.gz";
        mount_checksum(&server, name, &md5_of(PAYLOAD), 1).await;
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PAYLOAD))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(name), b"truncated").unwrap();
        let f = fetcher(&dir);
        let entry = f.ensure_artifact(&artifact(&server, name)).await.unwrap();
        assert_eq!(std::fs::read(&entry.local_path).unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn matching_local_copy_is_never_downloaded() {
        let server = MockServer::start().await;
        let name = "dblp-2021-11-01.xml.gz";
        mount_checksum(&server, name, &md5_of(PAYLOAD), 1).await;
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PAYLOAD))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(name), PAYLOAD).unwrap();
        let f = fetcher(&dir);
        f.ensure_artifact(&artifact(&server, name)).await.unwrap();
        assert_eq!(f.stats().cached_hits, 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_after_download_is_integrity_error() {
        let server = MockServer::start().await;
        let name = "dblp-2021-11-01.xml.gz";
        mount_checksum(&server, name, "00000000000000000000000000000000", 1).await;
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PAYLOAD))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let f = fetcher(&dir);
        let err = f.ensure_artifact(&artifact(&server, name)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Integrity { .. }));
        assert!(err.is_fatal());
        assert_eq!(f.stats().verify_failed, 1);
    }

    #[tokio::test]
    async fn schema_reused_when_present() {
        let server = MockServer::start().await;
        let name = "dblp-2021-11-01.dtd";
        Mock::given(method("GET"))
            .and(path(format!("/release/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string("<!ENTITY x \"y\">"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let f = fetcher(&dir);
        let a = artifact(&server, name);
        let first = f.ensure_schema(&a).await.unwrap();
        let second = f.ensure_schema(&a).await.unwrap();
        assert!(!first.verified);
        assert_eq!(first.local_path, second.local_path);
        assert_eq!(first.local_path.parent(), Some(dir.path()));
    }

    #[test]
    fn decompress_once() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("dblp-2021-11-01.xml.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"<dblp></dblp>").unwrap();
        enc.finish().unwrap();

        let entry = CacheEntry {
            local_path: gz,
            source_url: "https://dblp.org/xml/release/dblp-2021-11-01.xml.gz".into(),
            verified: true,
        };
        let xml = ensure_decompressed(&entry).unwrap();
        assert_eq!(xml, dir.path().join("dblp-2021-11-01.xml"));
        assert_eq!(std::fs::read_to_string(&xml).unwrap(), "<dblp></dblp>");
        assert!(!dir.path().join("dblp-2021-11-01.xml.tmp").exists());

        // existing sibling is returned untouched
        std::fs::write(&xml, "sentinel").unwrap();
        let again = ensure_decompressed(&entry).unwrap();
        assert_eq!(std::fs::read_to_string(again).unwrap(), "sentinel");
    }

    #[test]
    fn corrupt_archive_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("dblp.xml.gz");
        std::fs::write(&gz, b"not gzip at all").unwrap();
        let entry = CacheEntry {
            local_path: gz,
            source_url: String::new(),
            verified: true,
        };
        assert!(ensure_decompressed(&entry).is_err());
        assert!(!dir.path().join("dblp.xml").exists());
        assert!(!dir.path().join("dblp.xml.tmp").exists());
    }

    #[test]
    fn unverified_archive_is_not_decompressed() {
        let dir = TempDir::new().unwrap();
        let entry = CacheEntry {
            local_path: dir.path().join("dblp.xml.gz"),
            source_url: String::new(),
            verified: false,
        };
        assert!(matches!(
            ensure_decompressed(&entry),
            Err(PipelineError::Integrity { .. })
        ));
    }
}
