// 📡 Source Adapters - Produce raw candidates, then fan them into one merger
//
// Adapters are independent and run concurrently, each on the blocking pool
// under its own timeout. They only produce candidates; the single consumer
// owns the aggregate store. A failed or timed-out source contributes nothing.

use crate::entities::RawCandidate;
use crate::error::ReconError;
use crate::merge::{CandidateMerger, MergeStats};
use crate::store::{AggregateStore, DEFAULT_SHARD_COUNT};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// One provider of card sightings. Adapters may emit partial fields and may
/// be invoked any number of times per run.
pub trait SourceAdapter: Send + Sync {
    /// Identifier stamped on candidates that do not carry one
    fn source_id(&self) -> &str;

    /// Produce this source's candidates
    fn fetch(&self) -> Result<Vec<RawCandidate>>;

    /// Adapter version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

// ============================================================================
// JSON FILE
// ============================================================================

/// A JSON array of candidate objects
pub struct JsonFileAdapter {
    id: String,
    path: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        JsonFileAdapter {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SourceAdapter for JsonFileAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn fetch(&self) -> Result<Vec<RawCandidate>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;
        let candidates: Vec<RawCandidate> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse candidates in {}", self.path.display()))?;
        Ok(candidates)
    }
}

// ============================================================================
// CSV FILE
// ============================================================================

/// Columns: name,issuer,fee,rate,rewards[,program][,bonus]
/// Example: "TD Aeroplan Visa Infinite","TD","$139","1x","travel/1.5x;groceries/1.5x"
#[derive(Debug, Deserialize)]
struct CsvRow {
    name: String,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default)]
    fee: Option<String>,
    #[serde(default)]
    rate: Option<String>,
    #[serde(default)]
    rewards: Option<String>,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    bonus: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub struct CsvFileAdapter {
    id: String,
    path: PathBuf,
}

impl CsvFileAdapter {
    pub fn new(id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        CsvFileAdapter {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    fn candidate_from_row(&self, row: CsvRow) -> RawCandidate {
        let mut candidate = RawCandidate::new(row.name, row.issuer.unwrap_or_default(), self.id.clone());
        candidate.fee_text = non_blank(row.fee);
        candidate.rate_text = non_blank(row.rate);
        candidate.program_text = non_blank(row.program);
        candidate.bonus_text = non_blank(row.bonus);
        if let Some(rewards) = row.rewards {
            candidate.reward_fragments = rewards
                .split(';')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }
        candidate
    }
}

impl SourceAdapter for CsvFileAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn fetch(&self) -> Result<Vec<RawCandidate>> {
        use csv::ReaderBuilder;

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut candidates = Vec::new();
        for (line_num, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 2, self.path.display())
            })?;
            candidates.push(self.candidate_from_row(row));
        }
        Ok(candidates)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Fixed candidate list
pub struct StaticAdapter {
    id: String,
    candidates: Vec<RawCandidate>,
}

impl StaticAdapter {
    pub fn new(id: impl Into<String>, candidates: Vec<RawCandidate>) -> Self {
        StaticAdapter {
            id: id.into(),
            candidates,
        }
    }
}

impl SourceAdapter for StaticAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn fetch(&self) -> Result<Vec<RawCandidate>> {
        Ok(self.candidates.clone())
    }
}

// ============================================================================
// INGESTION
// ============================================================================

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Per-source fetch timeout
    pub timeout: Duration,
    pub shard_count: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            timeout: Duration::from_secs(15),
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub candidates: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

pub struct IngestOutcome {
    pub store: AggregateStore,
    pub merge_stats: MergeStats,
    /// One report per adapter, in adapter order
    pub sources: Vec<SourceReport>,
}

impl IngestOutcome {
    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_failure()).count()
    }
}

/// Run every adapter concurrently and merge their candidates into a fresh
/// store. Returns once every source has finished or timed out, so the store
/// is a closed snapshot.
pub async fn ingest(adapters: Vec<Arc<dyn SourceAdapter>>, options: IngestOptions) -> IngestOutcome {
    let (tx, mut rx) = mpsc::channel::<RawCandidate>(CHANNEL_CAPACITY);

    let mut handles = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let source_id = adapter.source_id().to_string();
        let tx = tx.clone();
        let timeout = options.timeout;
        let handle = tokio::spawn(async move { run_adapter(adapter, tx, timeout).await });
        handles.push((source_id, handle));
    }
    // The channel closes once every producer has dropped its sender
    drop(tx);

    let mut store = AggregateStore::with_shards(options.shard_count);
    let mut merger = CandidateMerger::new();
    while let Some(candidate) = rx.recv().await {
        merger.merge(&mut store, &candidate);
    }

    let mut sources = Vec::with_capacity(handles.len());
    for (source_id, handle) in handles {
        match handle.await {
            Ok(report) => sources.push(report),
            Err(e) => {
                warn!(target: "ingest", source = %source_id, error = %e, "adapter task aborted");
                sources.push(SourceReport {
                    source_id,
                    candidates: 0,
                    error: Some(format!("adapter task aborted: {}", e)),
                    elapsed_ms: 0,
                });
            }
        }
    }

    let merge_stats = merger.into_stats();
    info!(target: "ingest", records = store.len(), "{}", merge_stats.summary());

    IngestOutcome {
        store,
        merge_stats,
        sources,
    }
}

async fn run_adapter(
    adapter: Arc<dyn SourceAdapter>,
    tx: mpsc::Sender<RawCandidate>,
    timeout: Duration,
) -> SourceReport {
    let source_id = adapter.source_id().to_string();
    let version = adapter.version().to_string();
    let started = Instant::now();

    let fetch = tokio::task::spawn_blocking(move || adapter.fetch());
    let fetched = match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(Ok(candidates))) => Ok(candidates),
        Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
        Ok(Err(e)) => Err(format!("adapter panicked: {}", e)),
        Err(_) => Err(format!("timed out after {:?}", timeout)),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match fetched {
        Ok(candidates) => {
            let count = candidates.len();
            for mut candidate in candidates {
                if candidate.source_id.trim().is_empty() {
                    candidate.source_id = source_id.clone();
                }
                if tx.send(candidate).await.is_err() {
                    break;
                }
            }
            info!(target: "ingest", source = %source_id, version = %version, candidates = count, elapsed_ms, "source fetched");
            SourceReport {
                source_id,
                candidates: count,
                error: None,
                elapsed_ms,
            }
        }
        Err(message) => {
            let failure = ReconError::Source {
                source_id: source_id.clone(),
                message,
            };
            warn!(target: "ingest", elapsed_ms, "{}; contributing nothing", failure);
            SourceReport {
                source_id,
                candidates: 0,
                error: Some(failure.to_string()),
                elapsed_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct FailingAdapter;

    impl SourceAdapter for FailingAdapter {
        fn source_id(&self) -> &str {
            "broken"
        }

        fn fetch(&self) -> Result<Vec<RawCandidate>> {
            anyhow::bail!("connection refused")
        }
    }

    struct SlowAdapter;

    impl SourceAdapter for SlowAdapter {
        fn source_id(&self) -> &str {
            "slow"
        }

        fn fetch(&self) -> Result<Vec<RawCandidate>> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(vec![RawCandidate::new("Late Card", "TD", "slow")])
        }
    }

    fn create_test_candidates() -> Vec<RawCandidate> {
        vec![
            RawCandidate::new("TD Aeroplan Visa Infinite", "TD", "")
                .with_fee("$139")
                .with_reward("travel/1.5x"),
            RawCandidate::new("Scotiabank Gold American Express", "Scotiabank", "")
                .with_fee("$120")
                .with_reward("groceries/5x"),
        ]
    }

    #[test]
    fn test_json_adapter_reads_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "TD Aeroplan Visa Infinite", "issuer": "TD", "fee_text": "$139", "reward_fragments": ["travel/1.5x"]}}]"#
        )
        .unwrap();

        let adapter = JsonFileAdapter::new("ratehub", file.path());
        let candidates = adapter.fetch().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].fee_text.as_deref(), Some("$139"));
        assert_eq!(candidates[0].reward_fragments, vec!["travel/1.5x"]);
    }

    #[test]
    fn test_csv_adapter_splits_rewards() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,issuer,fee,rate,rewards").unwrap();
        writeln!(file, "\"TD Aeroplan Visa Infinite\",TD,$139,1x,\"travel/1.5x; groceries/1.5x\"").unwrap();
        writeln!(file, "\"Tangerine Money-Back\",,,,").unwrap();

        let adapter = CsvFileAdapter::new("bank-sites", file.path());
        let candidates = adapter.fetch().unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source_id, "bank-sites");
        assert_eq!(candidates[0].reward_fragments, vec!["travel/1.5x", "groceries/1.5x"]);
        assert_eq!(candidates[0].rate_text.as_deref(), Some("1x"));
        assert_eq!(candidates[1].fee_text, None);
        assert!(candidates[1].reward_fragments.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        let adapter = JsonFileAdapter::new("ghost", "/nonexistent/cards.json");
        assert!(adapter.fetch().is_err());
    }

    #[tokio::test]
    async fn test_ingest_stamps_source_and_merges() {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(StaticAdapter::new(
            "ratehub",
            create_test_candidates(),
        ))];

        let outcome = ingest(adapters, IngestOptions::default()).await;
        assert_eq!(outcome.store.len(), 2);
        assert_eq!(outcome.merge_stats.records_created, 2);
        assert_eq!(outcome.sources[0].candidates, 2);
        assert!(outcome
            .store
            .iter()
            .all(|record| record.sources.contains("ratehub")));
    }

    #[tokio::test]
    async fn test_failing_source_contributes_nothing() {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(FailingAdapter),
            Arc::new(StaticAdapter::new("ratehub", create_test_candidates())),
        ];

        let outcome = ingest(adapters, IngestOptions::default()).await;
        assert_eq!(outcome.failed_sources(), 1);
        assert_eq!(outcome.sources[0].source_id, "broken");
        assert!(outcome.sources[0].error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(outcome.store.len(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_source_contributes_nothing() {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(SlowAdapter)];
        let options = IngestOptions {
            timeout: Duration::from_millis(20),
            ..IngestOptions::default()
        };

        let outcome = ingest(adapters, options).await;
        assert_eq!(outcome.failed_sources(), 1);
        assert!(outcome.store.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_adapter_is_harmless() {
        let adapter = Arc::new(StaticAdapter::new("ratehub", create_test_candidates()));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![adapter.clone(), adapter];

        let outcome = ingest(adapters, IngestOptions::default()).await;
        assert_eq!(outcome.store.len(), 2);
        assert_eq!(outcome.merge_stats.replays_skipped, 2);
        assert!(outcome.store.iter().all(|record| record.confidence <= 0.5 + 1e-9));
    }
}
