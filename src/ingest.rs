//! Batch ingestion engine.
//!
//! Walks a list of input files in caller order, feeds each parsed document
//! through an adapter, and upserts seeds, variations, and miners while
//! appending one observation per accepted record.
//!
//! # Transactions
//!
//! Each file is one unit of work: its `source_files` row, entity upserts,
//! and observations commit together. A crash mid-file therefore leaves no
//! checksum trail and a resumed run reprocesses that file from the start;
//! a committed `source_files` row always means the file's records are in.
//!
//! In dry-run mode a single transaction spans the whole run and is rolled
//! back at the end. Lookups still see previously committed data and the
//! in-run upserts, so metrics match what a real run would report.
//!
//! # Error policy
//!
//! - unknown adapter: fatal before any store access
//! - unreadable or malformed file: one invalid record, next file
//! - record failing validation: one invalid record, next record
//! - storage failure: fatal; the in-flight file rolls back

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use seed_pipeline_core::metrics::Metrics;
use seed_pipeline_core::models::{Batch, NewObservation};
use seed_pipeline_core::normalize::{content_hash, Normalizer};
use seed_pipeline_core::store::{Store, StoreTx};
use seed_pipeline_core::validate::validate_record;

use crate::adapters::{Adapter, AdapterRegistry};
use crate::config::Config;
use crate::file_tracker::{compute_checksum, list_json_files, load_json};
use crate::progress::{FileOutcome, IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::sqlite_store::SqliteStore;

/// Per-run switches for [`ingest_batch`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Count everything, persist nothing.
    pub dry_run: bool,
    /// Skip files whose content checksum is already recorded for the batch.
    pub resume: bool,
    /// Must be >= 1. Processing is sequential; values above 1 are reserved.
    pub workers: usize,
    pub collapse_repeats: bool,
    /// Label stored on the batch if this run creates it.
    pub source_system: Option<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            resume: true,
            workers: 1,
            collapse_repeats: false,
            source_system: None,
        }
    }
}

impl IngestOptions {
    /// Defaults taken from the `[ingest]` config section.
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.ingest.workers,
            collapse_repeats: config.ingest.collapse_repeats,
            source_system: config.ingest.source_system.clone(),
            ..Default::default()
        }
    }
}

/// Run the `ingest` command: ingest every `.json` file in `dir`.
///
/// Fails if the adapter is unknown or the directory holds no `.json` files.
/// Invalid records never fail the command; they show up in the summary.
pub async fn run_ingest(
    config: &Config,
    batch_name: &str,
    adapter_name: &str,
    dir: &Path,
    options: &IngestOptions,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let adapters = AdapterRegistry::with_builtins();
    adapters.get(adapter_name)?;

    let files = list_json_files(dir)?;
    if files.is_empty() {
        bail!("No .json files found in {}", dir.display());
    }

    let store = SqliteStore::open(config).await?;
    let reporter = progress.reporter();
    let result = ingest_batch(
        &store,
        &adapters,
        batch_name,
        &files,
        adapter_name,
        options,
        reporter.as_ref(),
    )
    .await;
    store.close().await;
    let metrics = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics.as_map())?);
    } else {
        println!("{}", metrics.summary());
    }
    Ok(())
}

/// Ingest `files` into the batch named `batch_name` using the adapter
/// registered as `adapter_name`.
pub async fn ingest_batch(
    store: &dyn Store,
    adapters: &AdapterRegistry,
    batch_name: &str,
    files: &[PathBuf],
    adapter_name: &str,
    options: &IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<Metrics> {
    let adapter = adapters.get(adapter_name)?;

    if options.workers == 0 {
        bail!("workers must be >= 1");
    }
    if options.workers > 1 {
        debug!(
            workers = options.workers,
            "parallel file processing is reserved; running sequentially"
        );
    }

    let normalizer = Normalizer::new(options.collapse_repeats);
    let total = files.len() as u64;
    let mut metrics = Metrics::new();

    info!(
        batch = batch_name,
        adapter = adapter_name,
        files = total,
        dry_run = options.dry_run,
        resume = options.resume,
        "ingest started"
    );
    progress.report(IngestProgressEvent::Started {
        batch: batch_name.to_string(),
        total,
    });

    // Dry-run keeps one transaction open for the whole run and discards it.
    let mut run_tx = store.begin().await?;
    let batch = run_tx
        .get_or_create_batch(batch_name, options.source_system.as_deref())
        .await?
        .into_inner();
    let mut run_tx = if options.dry_run {
        Some(run_tx)
    } else {
        run_tx.commit().await.context("Failed to record batch")?;
        None
    };

    let ctx = FileContext {
        adapter,
        normalizer: &normalizer,
        batch: &batch,
        options,
    };

    for (i, path) in files.iter().enumerate() {
        if !path.is_file() {
            debug!(path = %path.display(), "not a regular file, skipping");
            continue;
        }

        let outcome = match compute_checksum(path) {
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable input file");
                metrics.record_invalid();
                FileOutcome::Malformed
            }
            Ok(checksum) => match run_tx.as_mut() {
                Some(tx) => {
                    ctx.process(&mut **tx, path, &checksum, &mut metrics)
                        .await?
                }
                None => {
                    let mut tx = store.begin().await?;
                    let outcome = ctx
                        .process(&mut *tx, path, &checksum, &mut metrics)
                        .await?;
                    if matches!(outcome, FileOutcome::Processed { .. }) {
                        tx.commit().await.with_context(|| {
                            format!("Failed to commit {}", path.display())
                        })?;
                    } else {
                        tx.rollback().await?;
                    }
                    outcome
                }
            },
        };

        progress.report(IngestProgressEvent::File {
            batch: batch_name.to_string(),
            n: i as u64 + 1,
            total,
            path: path.display().to_string(),
            outcome,
        });
    }

    if let Some(tx) = run_tx.take() {
        tx.rollback().await?;
    }

    info!(batch = batch_name, dry_run = options.dry_run, "{}", metrics.summary());
    Ok(metrics)
}

/// Everything a single file needs that stays fixed for the run.
struct FileContext<'a> {
    adapter: &'a dyn Adapter,
    normalizer: &'a Normalizer,
    batch: &'a Batch,
    options: &'a IngestOptions,
}

impl FileContext<'_> {
    /// Check resume, load, and upsert one file inside `tx`. Only storage
    /// errors are returned; bad input is counted in `metrics`.
    async fn process(
        &self,
        tx: &mut dyn StoreTx,
        path: &Path,
        checksum: &str,
        metrics: &mut Metrics,
    ) -> Result<FileOutcome> {
        if self.options.resume && tx.find_source_file(self.batch.id, checksum).await?.is_some() {
            debug!(path = %path.display(), checksum, "already ingested, skipping");
            metrics.record_file_skipped();
            return Ok(FileOutcome::Skipped);
        }

        let doc = match load_json(path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "malformed input file");
                metrics.record_invalid();
                return Ok(FileOutcome::Malformed);
            }
        };

        let source_file = if self.options.dry_run {
            None
        } else {
            let file_path = path.to_string_lossy();
            Some(
                tx.create_source_file(self.batch.id, &file_path, checksum)
                    .await?,
            )
        };

        let mut accepted: u64 = 0;
        for record in self.adapter.records(&doc) {
            let valid = match validate_record(&record) {
                Ok(valid) => valid,
                Err(reason) => {
                    debug!(path = %path.display(), %reason, "invalid record");
                    metrics.record_invalid();
                    continue;
                }
            };

            let seed_norm = self.normalizer.seed(valid.seed);
            let seed = tx
                .get_or_create_seed(valid.seed, &seed_norm, &content_hash(&seed_norm))
                .await?;
            metrics.record_seed(seed.created);

            let var_norm = self.normalizer.variation(valid.variation);
            let variation = tx
                .get_or_create_variation(
                    &seed.value,
                    valid.variation,
                    &var_norm,
                    &content_hash(&var_norm),
                )
                .await?;
            metrics.record_variation(variation.created);

            let miner = tx.get_or_create_miner(valid.miner_ext_id).await?;

            if !self.options.dry_run {
                let raw_payload = valid
                    .raw
                    .map(serde_json::to_string)
                    .transpose()
                    .context("Failed to serialize raw payload")?;
                tx.record_observation(&NewObservation {
                    seed_id: seed.value.id,
                    variation_id: variation.value.id,
                    miner_id: miner.map(|m| m.id),
                    batch_id: Some(self.batch.id),
                    source_file_id: source_file.as_ref().map(|f| f.id),
                    score: valid.score,
                    raw_payload,
                })
                .await?;
            }
            metrics.record_observation();
            accepted += 1;
        }

        if let Some(file) = &source_file {
            tx.set_record_count(file.id, accepted as i64).await?;
        }

        debug!(path = %path.display(), records = accepted, "file processed");
        metrics.record_file_processed();
        Ok(FileOutcome::Processed { records: accepted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use seed_pipeline_core::models::StoreCounts;
    use seed_pipeline_core::store::memory::InMemoryStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CANONICAL: &str = "canonical_records_v1";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    async fn run(
        store: &dyn Store,
        batch: &str,
        files: &[PathBuf],
        options: &IngestOptions,
    ) -> Result<Metrics> {
        ingest_batch(
            store,
            &AdapterRegistry::with_builtins(),
            batch,
            files,
            CANONICAL,
            options,
            &NoProgress,
        )
        .await
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<IngestProgressEvent>>);

    impl IngestProgressReporter for Recorder {
        fn report(&self, event: IngestProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn test_same_record_twice_dedups_entities_not_observations() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.json", r#"[{"seed":"Michaël","variation":"Mikel","miner_ext_id":"m1"}]"#);
        let b = write(tmp.path(), "b.json", r#"[{"seed":"MICHAEL","variation":" mikel ","miner_ext_id":"m1"}]"#);

        let store = InMemoryStore::new();
        let m = run(&store, "b1", &[a, b], &IngestOptions::default()).await.unwrap();

        assert_eq!(m.seeds_new, 1);
        assert_eq!(m.seeds_existing, 1);
        assert_eq!(m.variations_new, 1);
        assert_eq!(m.variations_existing, 1);
        assert_eq!(m.observations_inserted, 2);
        assert_eq!(m.files_processed, 2);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.seeds, 1);
        assert_eq!(counts.variations, 1);
        assert_eq!(counts.miners, 1);
        assert_eq!(counts.observations, 2);
        assert_eq!(store.seeds().unwrap()[0].seed_text, "Michaël");
    }

    #[tokio::test]
    async fn test_same_record_across_batches() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna"}]"#);

        let store = InMemoryStore::new();
        run(&store, "b1", &[a.clone()], &IngestOptions::default()).await.unwrap();
        let m = run(&store, "b2", &[a], &IngestOptions::default()).await.unwrap();

        assert_eq!(m.files_skipped, 0);
        assert_eq!(m.seeds_existing, 1);
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.seeds, counts.variations, counts.observations), (1, 1, 2));
        assert_eq!(counts.batches, 2);
    }

    #[tokio::test]
    async fn test_resume_skips_unchanged_files() {
        let tmp = TempDir::new().unwrap();
        let files = vec![
            write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna"}]"#),
            write(tmp.path(), "b.json", r#"[{"seed":"Bob","variation":"Rob"},{"seed":"Bob","variation":"Bobby"}]"#),
        ];

        let store = InMemoryStore::new();
        let first = run(&store, "b1", &files, &IngestOptions::default()).await.unwrap();
        assert_eq!(first.observations_inserted, 3);
        let before = store.counts().await.unwrap();

        let second = run(&store, "b1", &files, &IngestOptions::default()).await.unwrap();
        assert_eq!(second.files_skipped, 2);
        assert_eq!(second.files_processed, 0);
        assert_eq!(second.observations_inserted, 0);
        assert_eq!(store.counts().await.unwrap(), before);

        let records: Vec<Option<i64>> = store
            .source_files()
            .unwrap()
            .iter()
            .map(|f| f.record_count)
            .collect();
        assert_eq!(records, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_renamed_copy_is_skipped_and_changed_content_is_not() {
        let tmp = TempDir::new().unwrap();
        let body = r#"[{"seed":"Ana","variation":"Anna"}]"#;
        let a = write(tmp.path(), "a.json", body);

        let store = InMemoryStore::new();
        run(&store, "b1", &[a.clone()], &IngestOptions::default()).await.unwrap();

        let renamed = write(tmp.path(), "renamed.json", body);
        let m = run(&store, "b1", &[renamed], &IngestOptions::default()).await.unwrap();
        assert_eq!(m.files_skipped, 1);
        assert_eq!(m.observations_inserted, 0);

        let changed = write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anne"}]"#);
        let m = run(&store, "b1", &[changed], &IngestOptions::default()).await.unwrap();
        assert_eq!(m.files_skipped, 0);
        assert_eq!(m.files_processed, 1);
        assert_eq!(m.variations_new, 1);
    }

    #[tokio::test]
    async fn test_no_resume_reprocesses() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna"}]"#);
        let store = InMemoryStore::new();
        let opts = IngestOptions {
            resume: false,
            ..Default::default()
        };
        run(&store, "b1", &[a.clone()], &opts).await.unwrap();
        let m = run(&store, "b1", &[a], &opts).await.unwrap();

        assert_eq!(m.files_processed, 1);
        assert_eq!(m.observations_inserted, 1);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.observations, 2);
        assert_eq!(counts.source_files, 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let files = vec![
            write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna","miner_ext_id":"m"}]"#),
            write(tmp.path(), "b.json", r#"[{"seed":"ana","variation":"ANNA"}]"#),
        ];
        let store = InMemoryStore::new();
        let opts = IngestOptions {
            dry_run: true,
            ..Default::default()
        };
        let m = run(&store, "b1", &files, &opts).await.unwrap();

        assert_eq!(m.observations_inserted, 2);
        assert_eq!(m.seeds_new, 1);
        assert_eq!(m.seeds_existing, 1);
        assert_eq!(m.files_processed, 2);
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn test_dry_run_sees_committed_data() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna"}]"#);
        let store = InMemoryStore::new();
        run(&store, "b1", &[a.clone()], &IngestOptions::default()).await.unwrap();
        let before = store.counts().await.unwrap();

        let opts = IngestOptions {
            dry_run: true,
            resume: false,
            ..Default::default()
        };
        let m = run(&store, "b1", &[a], &opts).await.unwrap();
        assert_eq!(m.seeds_existing, 1);
        assert_eq!(m.variations_existing, 1);
        assert_eq!(m.observations_inserted, 1);
        assert_eq!(store.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_abort_batch() {
        let tmp = TempDir::new().unwrap();
        let files = vec![
            write(tmp.path(), "a.json", "{ this is not json"),
            write(tmp.path(), "b.json", r#"[{"seed":"Ana","variation":"Anna"}]"#),
        ];
        let store = InMemoryStore::new();
        let m = run(&store, "b1", &files, &IngestOptions::default()).await.unwrap();

        assert_eq!(m.invalid_records, 1);
        assert_eq!(m.files_processed, 1);
        assert_eq!(m.observations_inserted, 1);
        assert_eq!(store.source_files().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_records_counted_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let a = write(
            tmp.path(),
            "a.json",
            r#"[
                {"seed":"Ana","variation":"Anna","score":0.75,"raw":{"src":"x"}},
                {"seed":"","variation":"Anna"},
                {"seed":"Ana"},
                {"seed":"   ","variation":"x"},
                "junk"
            ]"#,
        );
        let store = InMemoryStore::new();
        let m = run(&store, "b1", &[a], &IngestOptions::default()).await.unwrap();

        assert_eq!(m.invalid_records, 4);
        assert_eq!(m.observations_inserted, 1);
        assert_eq!(store.source_files().unwrap()[0].record_count, Some(1));

        let obs = &store.observations().unwrap()[0];
        assert_eq!(obs.score, Some(0.75));
        assert_eq!(obs.raw_payload.as_deref(), Some(r#"{"src":"x"}"#));
        assert!(obs.miner_id.is_none());
    }

    #[tokio::test]
    async fn test_falsy_raw_payload_not_stored() {
        let tmp = TempDir::new().unwrap();
        let a = write(
            tmp.path(),
            "a.json",
            r#"[
                {"seed":"Ana","variation":"Anna","raw":{}},
                {"seed":"Ana","variation":"Anna","raw":0},
                {"seed":"Ana","variation":"Anna","raw":""},
                {"seed":"Ana","variation":"Anna","raw":[0]}
            ]"#,
        );
        let store = InMemoryStore::new();
        let m = run(&store, "b1", &[a], &IngestOptions::default()).await.unwrap();
        assert_eq!(m.observations_inserted, 4);

        let payloads: Vec<Option<String>> = store
            .observations()
            .unwrap()
            .into_iter()
            .map(|o| o.raw_payload)
            .collect();
        assert_eq!(payloads, vec![None, None, None, Some("[0]".to_string())]);
    }

    #[tokio::test]
    async fn test_unknown_adapter_is_fatal_before_writes() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a.json", "[]");
        let store = InMemoryStore::new();
        let err = ingest_batch(
            &store,
            &AdapterRegistry::with_builtins(),
            "b1",
            &[a],
            "no_such_adapter",
            &IngestOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("unknown adapter 'no_such_adapter'"));
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let store = InMemoryStore::new();
        let opts = IngestOptions {
            workers: 0,
            ..Default::default()
        };
        assert!(run(&store, "b1", &[], &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_non_regular_inputs_skipped_silently() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("sub.json");
        std::fs::create_dir(&dir).unwrap();
        let missing = tmp.path().join("missing.json");

        let store = InMemoryStore::new();
        let m = run(&store, "b1", &[dir, missing], &IngestOptions::default()).await.unwrap();
        assert_eq!(m, Metrics::default());
        assert_eq!(store.counts().await.unwrap().batches, 1);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let tmp = TempDir::new().unwrap();
        let files = vec![
            write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna"}]"#),
            write(tmp.path(), "b.json", "nope"),
        ];
        let store = InMemoryStore::new();
        let recorder = Recorder::default();
        ingest_batch(
            &store,
            &AdapterRegistry::with_builtins(),
            "b1",
            &files,
            CANONICAL,
            &IngestOptions::default(),
            &recorder,
        )
        .await
        .unwrap();

        let events = recorder.0.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], IngestProgressEvent::Started { total: 2, .. }));
        assert!(matches!(
            &events[1],
            IngestProgressEvent::File { n: 1, outcome: FileOutcome::Processed { records: 1 }, .. }
        ));
        assert!(matches!(
            &events[2],
            IngestProgressEvent::File { n: 2, outcome: FileOutcome::Malformed, .. }
        ));
    }

    #[tokio::test]
    async fn test_generic_responses_against_sqlite() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path().join("db").join("seeds.sqlite"));
        let store = SqliteStore::open(&cfg).await.unwrap();

        let doc = r#"{
            "responses": {
                "149": {"uid": 149, "hotkey": "0xabc", "variations": {"Michael": ["Micheal", "Mikel"], "Ahmed": ["Ahmad", ""]}},
                "150": {"uid": 150, "variations": {"michael": ["MIKEL"]}}
            }
        }"#;
        let files = vec![write(tmp.path(), "r1.json", doc)];
        let opts = IngestOptions {
            source_system: Some("subnet".into()),
            ..Default::default()
        };

        let m = ingest_batch(
            &store,
            &AdapterRegistry::with_builtins(),
            "run-1",
            &files,
            "generic_responses_v1",
            &opts,
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(m.seeds_new, 2);
        assert_eq!(m.variations_new, 3);
        assert_eq!(m.variations_existing, 1);
        assert_eq!(m.observations_inserted, 4);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.seeds, 2);
        assert_eq!(counts.variations, 3);
        assert_eq!(counts.miners, 2);
        assert_eq!(counts.observations, 4);

        // Second run resumes.
        let again = ingest_batch(
            &store,
            &AdapterRegistry::with_builtins(),
            "run-1",
            &files,
            "generic_responses_v1",
            &opts,
            &NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(again.files_skipped, 1);
        assert_eq!(again.observations_inserted, 0);
        assert_eq!(store.counts().await.unwrap(), counts);
        store.close().await;
    }

    #[tokio::test]
    async fn test_dry_run_against_sqlite_leaves_tables_empty() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path().join("seeds.sqlite"));
        let store = SqliteStore::open(&cfg).await.unwrap();
        let a = write(tmp.path(), "a.json", r#"[{"seed":"Ana","variation":"Anna","miner_ext_id":"m"}]"#);

        let opts = IngestOptions {
            dry_run: true,
            ..Default::default()
        };
        let m = run(&store, "b1", &[a], &opts).await.unwrap();
        assert_eq!(m.observations_inserted, 1);
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
        store.close().await;
    }
}
