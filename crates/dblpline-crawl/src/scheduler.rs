//! Chunked crawl with fetch/process pipelining
//!
//! Targets are split into fixed-size chunks, each owning one pre-created
//! `chunk########` directory. While chunk `i` is processed on the calling
//! thread, chunk `i + 1` is fetched on a scoped worker thread. Once
//! `process(i)` returns, the chunk's raw documents are deleted and its
//! extracted outputs are kept.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use dblpline_core::is_shutdown_requested;
use dblpline_dblp::RetrievalTarget;
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::StdRng};

use crate::fetcher::FetchResult;

/// A fixed-size slice of retrieval targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlChunk {
    pub index: usize,
    pub targets: Vec<RetrievalTarget>,
}

/// Order-preserving split into chunks of at most `chunk_size`.
pub fn partition(targets: Vec<RetrievalTarget>, chunk_size: usize) -> Vec<CrawlChunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(targets.len().div_ceil(chunk_size));
    let mut iter = targets.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(CrawlChunk {
            index: chunks.len(),
            targets: iter.by_ref().take(chunk_size).collect(),
        });
    }
    chunks
}

/// Shuffle so records of one host do not land in the same chunk.
pub fn shuffle_targets(targets: &mut [RetrievalTarget], seed: Option<u64>) {
    match seed {
        Some(seed) => targets.shuffle(&mut StdRng::seed_from_u64(seed)),
        None => targets.shuffle(&mut rand::rng()),
    }
}

pub fn chunk_dir(pdf_dir: &Path, index: usize) -> PathBuf {
    pdf_dir.join(format!("chunk{index:08}"))
}

/// Create one directory per chunk before any fetch starts.
///
/// An existing `pdf_dir` is an error unless `overwrite` is set, in which
/// case it is wiped first.
pub fn prepare_chunk_dirs(pdf_dir: &Path, chunks: usize, overwrite: bool) -> Result<Vec<PathBuf>> {
    if pdf_dir.exists() {
        anyhow::ensure!(
            overwrite,
            "{} already exists; pass --overwrite-pdf-cache to replace it",
            pdf_dir.display()
        );
        log::info!("Removing previous crawl cache {}", pdf_dir.display());
        fs::remove_dir_all(pdf_dir)
            .with_context(|| format!("failed to remove {}", pdf_dir.display()))?;
    }
    (0..chunks)
        .map(|i| {
            let dir = chunk_dir(pdf_dir, i);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Ok(dir)
        })
        .collect()
}

/// Delete raw documents (and stale partial downloads) from a processed chunk.
pub fn cleanup_payloads(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .is_some_and(|ext| ext == "pdf" || ext == "part")
        {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Process,
    Cleanup,
}

/// A chunk-level failure; the run carried on past it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    pub index: usize,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub results: Vec<FetchResult>,
    pub failures: Vec<ChunkFailure>,
    /// Chunks whose process stage completed without error
    pub processed_chunks: usize,
}

impl CrawlReport {
    pub fn fetched(&self) -> usize {
        self.results.iter().filter(|r| r.is_hit()).count()
    }

    pub fn missed(&self) -> usize {
        self.results.len() - self.fetched()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `fetch` and `process` over `chunks`, overlapping fetch(i + 1) with process(i).
///
/// `dirs[i]` is chunk `i`'s directory. A failing or panicking stage is
/// recorded in the report and never stops later chunks. When shutdown is
/// requested no further fetch is started, but the chunk already fetched is
/// still processed.
pub fn run_pipeline<F, P>(
    chunks: &[CrawlChunk],
    dirs: &[PathBuf],
    fetch: F,
    mut process: P,
) -> Result<CrawlReport>
where
    F: Fn(&CrawlChunk, &Path) -> Result<Vec<FetchResult>> + Sync,
    P: FnMut(&CrawlChunk, &Path) -> Result<()>,
{
    anyhow::ensure!(
        chunks.len() == dirs.len(),
        "{} chunks but {} chunk directories",
        chunks.len(),
        dirs.len()
    );
    let mut report = CrawlReport::default();
    if chunks.is_empty() {
        return Ok(report);
    }

    thread::scope(|s| {
        let fetch = &fetch;
        let mut fetched = Some(
            panic::catch_unwind(AssertUnwindSafe(|| fetch(&chunks[0], &dirs[0]))).unwrap_or_else(
                |p| Err(anyhow::anyhow!("fetch panicked: {}", panic_message(&*p))),
            ),
        );

        for (i, chunk) in chunks.iter().enumerate() {
            let Some(current) = fetched.take() else { break };

            let next = match chunks.get(i + 1) {
                Some(next_chunk) if !is_shutdown_requested() => {
                    let dir = &dirs[i + 1];
                    Some(s.spawn(move || fetch(next_chunk, dir)))
                }
                Some(_) => {
                    log::warn!("Shutdown requested, not fetching chunk {}", i + 1);
                    None
                }
                None => None,
            };

            match current {
                Ok(results) => report.results.extend(results),
                Err(e) => report.failures.push(ChunkFailure {
                    index: chunk.index,
                    stage: Stage::Fetch,
                    message: format!("{e:#}"),
                }),
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(chunk, &dirs[i])))
                .unwrap_or_else(|p| {
                    Err(anyhow::anyhow!("process panicked: {}", panic_message(&*p)))
                });
            match outcome {
                Ok(()) => report.processed_chunks += 1,
                Err(e) => {
                    log::error!("chunk {}: process failed: {e:#}", chunk.index);
                    report.failures.push(ChunkFailure {
                        index: chunk.index,
                        stage: Stage::Process,
                        message: format!("{e:#}"),
                    });
                }
            }

            match cleanup_payloads(&dirs[i]) {
                Ok(n) => log::debug!("chunk {}: removed {n} payload files", chunk.index),
                Err(e) => report.failures.push(ChunkFailure {
                    index: chunk.index,
                    stage: Stage::Cleanup,
                    message: e.to_string(),
                }),
            }

            fetched = next.map(|handle| {
                handle.join().unwrap_or_else(|p| {
                    Err(anyhow::anyhow!("fetch panicked: {}", panic_message(&*p)))
                })
            });
        }
    });

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn targets(n: usize) -> Vec<RetrievalTarget> {
        (0..n)
            .map(|i| RetrievalTarget {
                key: format!("k/{i}"),
                url: format!("https://example.org/{i}.pdf"),
            })
            .collect()
    }

    #[test]
    fn partition_preserves_order() {
        let chunks = partition(targets(7), 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.targets.len()).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert_eq!(chunks[1].index, 1);
        assert_eq!(chunks[1].targets[0].key, "k/3");
        assert!(partition(Vec::new(), 3).is_empty());
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let mut a = targets(50);
        let mut b = targets(50);
        shuffle_targets(&mut a, Some(7));
        shuffle_targets(&mut b, Some(7));
        assert_eq!(a, b);
        assert_ne!(a, targets(50));
    }

    #[test]
    fn chunk_dirs_are_zero_padded() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("pdf");
        let dirs = prepare_chunk_dirs(&pdf, 2, false).unwrap();
        assert_eq!(dirs[0], pdf.join("chunk00000000"));
        assert!(dirs.iter().all(|d| d.is_dir()));
    }

    #[test]
    fn existing_pdf_dir_needs_overwrite() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("pdf");
        prepare_chunk_dirs(&pdf, 3, false).unwrap();
        std::fs::write(pdf.join("chunk00000002/old.tei.xml"), "x").unwrap();

        assert!(prepare_chunk_dirs(&pdf, 1, false).is_err());
        let dirs = prepare_chunk_dirs(&pdf, 1, true).unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(!pdf.join("chunk00000002").exists());
    }

    #[test]
    fn cleanup_keeps_extracted_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), "pdf").unwrap();
        std::fs::write(dir.path().join("b.pdf.part"), "partial").unwrap();
        std::fs::write(dir.path().join("a.tei.xml"), "<TEI/>").unwrap();
        assert_eq!(cleanup_payloads(dir.path()).unwrap(), 2);
        assert!(dir.path().join("a.tei.xml").exists());
        assert!(!dir.path().join("a.pdf").exists());
    }

    fn position(events: &[String], needle: &str) -> usize {
        events
            .iter()
            .position(|e| e == needle)
            .unwrap_or_else(|| panic!("missing event {needle} in {events:?}"))
    }

    #[test]
    fn process_follows_its_fetch_and_precedes_later_chunks() {
        let tmp = TempDir::new().unwrap();
        let chunks = partition(targets(6), 2);
        let dirs = prepare_chunk_dirs(&tmp.path().join("pdf"), chunks.len(), false).unwrap();
        let events = Mutex::new(Vec::new());

        let report = run_pipeline(
            &chunks,
            &dirs,
            |chunk, dir| {
                events.lock().unwrap().push(format!("fetch-start {}", chunk.index));
                // a slow fetch makes overlap with the previous process observable
                std::thread::sleep(Duration::from_millis(20));
                std::fs::write(dir.join("doc.pdf"), "pdf").unwrap();
                events.lock().unwrap().push(format!("fetch-end {}", chunk.index));
                Ok(chunk
                    .targets
                    .iter()
                    .map(|t| FetchResult::hit(&t.key, dir.join("doc.pdf")))
                    .collect())
            },
            |chunk, dir| {
                assert!(dir.join("doc.pdf").exists(), "fetch finished before process");
                events.lock().unwrap().push(format!("process-start {}", chunk.index));
                // fetch(1) runs while process(0) is still going
                if chunk.index == 0 {
                    let deadline = std::time::Instant::now() + Duration::from_secs(5);
                    while !events.lock().unwrap().iter().any(|e| e == "fetch-start 1")
                        && std::time::Instant::now() < deadline
                    {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                std::fs::write(dir.join("doc.tei.xml"), "<TEI/>").unwrap();
                events.lock().unwrap().push(format!("process-end {}", chunk.index));
                Ok(())
            },
        )
        .unwrap();

        let ev = events.into_inner().unwrap();
        assert!(position(&ev, "fetch-end 0") < position(&ev, "process-start 0"));
        assert!(position(&ev, "process-end 0") < position(&ev, "process-start 2"));
        assert!(position(&ev, "fetch-end 1") < position(&ev, "process-start 1"));
        assert!(position(&ev, "fetch-end 2") < position(&ev, "process-start 2"));
        assert!(position(&ev, "fetch-start 1") < position(&ev, "process-end 0"));

        assert_eq!(report.processed_chunks, 3);
        assert_eq!(report.fetched(), 6);
        assert!(report.failures.is_empty());
        for dir in &dirs {
            assert!(!dir.join("doc.pdf").exists());
            assert!(dir.join("doc.tei.xml").exists());
        }
    }

    #[test]
    fn process_failure_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let chunks = partition(targets(3), 1);
        let dirs = prepare_chunk_dirs(&tmp.path().join("pdf"), chunks.len(), false).unwrap();
        let fetched = Mutex::new(Vec::new());

        let report = run_pipeline(
            &chunks,
            &dirs,
            |chunk, _| {
                fetched.lock().unwrap().push(chunk.index);
                Ok(vec![FetchResult::miss(&chunk.targets[0].key)])
            },
            |chunk, _| {
                if chunk.index == 1 {
                    anyhow::bail!("extraction service unreachable");
                }
                Ok(())
            },
        )
        .unwrap();

        let mut fetched = fetched.into_inner().unwrap();
        fetched.sort_unstable();
        assert_eq!(fetched, vec![0, 1, 2]);
        assert_eq!(report.processed_chunks, 2);
        assert_eq!(report.missed(), 3);
        assert_eq!(
            report.failures,
            vec![ChunkFailure {
                index: 1,
                stage: Stage::Process,
                message: "extraction service unreachable".into(),
            }]
        );
    }

    #[test]
    fn fetch_failure_still_processes_chunk() {
        let tmp = TempDir::new().unwrap();
        let chunks = partition(targets(2), 1);
        let dirs = prepare_chunk_dirs(&tmp.path().join("pdf"), chunks.len(), false).unwrap();
        let processed = Mutex::new(Vec::new());

        let report = run_pipeline(
            &chunks,
            &dirs,
            |chunk, _| {
                if chunk.index == 0 {
                    anyhow::bail!("runtime gone");
                }
                Ok(Vec::new())
            },
            |chunk, _| {
                processed.lock().unwrap().push(chunk.index);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(processed.into_inner().unwrap(), vec![0, 1]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Fetch);
    }

    #[test]
    fn process_panic_is_recorded_and_later_chunks_run() {
        let tmp = TempDir::new().unwrap();
        let chunks = partition(targets(3), 1);
        let dirs = prepare_chunk_dirs(&tmp.path().join("pdf"), chunks.len(), false).unwrap();
        let fetched = Mutex::new(Vec::new());

        let report = run_pipeline(
            &chunks,
            &dirs,
            |chunk, _| {
                fetched.lock().unwrap().push(chunk.index);
                Ok(Vec::new())
            },
            |chunk, _| {
                if chunk.index == 0 {
                    panic!("extractor blew up");
                }
                Ok(())
            },
        )
        .unwrap();

        let mut fetched = fetched.into_inner().unwrap();
        fetched.sort_unstable();
        assert_eq!(fetched, vec![0, 1, 2]);
        assert_eq!(report.processed_chunks, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.failures[0].stage, Stage::Process);
        assert!(report.failures[0].message.contains("extractor blew up"));
    }

    #[test]
    fn fetch_panic_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let chunks = partition(targets(2), 1);
        let dirs = prepare_chunk_dirs(&tmp.path().join("pdf"), chunks.len(), false).unwrap();

        let report = run_pipeline(
            &chunks,
            &dirs,
            |chunk, _| {
                if chunk.index == 1 {
                    panic!("socket exploded");
                }
                Ok(Vec::new())
            },
            |_, _| Ok(()),
        )
        .unwrap();

        assert_eq!(report.processed_chunks, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].stage, Stage::Fetch);
    }

    #[test]
    fn mismatched_dirs_are_rejected() {
        let chunks = partition(targets(2), 1);
        let result = run_pipeline(
            &chunks,
            &[PathBuf::from("only-one")],
            |_, _| Ok(Vec::new()),
            |_, _| Ok(()),
        );
        assert!(result.is_err());
    }
}
