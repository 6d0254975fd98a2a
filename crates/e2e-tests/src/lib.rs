//! End-to-end test infrastructure for vecsync.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the record-store-to-rewritten-query pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use vecsync_embeddings::MockEmbedder;
use vecsync_engine::{EngineConfig, HostHooks, NoOpProgress, ReconcileOutcome, SyncEngine};
use vecsync_storage::RecordDb;
use vecsync_types::{ModTime, NoteId, Record, Settings};

/// Model name the harness configures by default.
pub const MOCK_MODEL: &str = "mock-embed";

/// Vector dimension the harness configures by default.
pub const MOCK_DIM: usize = 64;

/// Shared test harness for E2E tests.
///
/// Provides a record store, a mock provider and an index path. The record
/// store stays open for the harness lifetime; engines may be opened and
/// dropped repeatedly against the same index path.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared record store
    pub store: Arc<RecordDb>,
    /// Provider used by [`TestHarness::engine`] and [`TestHarness::hooks`]
    pub provider: Arc<MockEmbedder>,
    /// Path for vector index files
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with temp directory and record store.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            RecordDb::open(&temp_dir.path().join("records")).expect("Failed to open record store"),
        );
        let index_path = temp_dir.path().join("vector-index");

        Self {
            _temp_dir: temp_dir,
            store,
            provider: Arc::new(MockEmbedder::new(MOCK_MODEL, MOCK_DIM)),
            index_path,
        }
    }

    /// Engine configuration for the harness model.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(MOCK_MODEL, MOCK_DIM, self.index_path.clone())
    }

    /// Settings a host would load, pointing at the harness paths.
    pub fn settings(&self) -> Settings {
        Settings {
            model_name: MOCK_MODEL.to_string(),
            embedding_size: MOCK_DIM,
            index_path: self.index_path.to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    /// Store a single-field record.
    pub fn put(&self, id: NoteId, text: &str, mod_time: ModTime) {
        self.store
            .put_record(&Record::new(id, vec![text.to_string()], mod_time))
            .expect("Failed to put record");
    }

    /// Store records in order.
    pub fn put_records(&self, records: &[Record]) {
        for record in records {
            self.store.put_record(record).expect("Failed to put record");
        }
    }

    /// Open an engine with `config` and the harness provider, then reconcile.
    pub async fn engine_with(&self, config: EngineConfig) -> (SyncEngine, ReconcileOutcome) {
        SyncEngine::initialize(
            config,
            self.provider.clone(),
            self.store.clone(),
            &NoOpProgress,
        )
        .await
        .expect("Failed to initialize engine")
    }

    /// Open an engine with the default configuration, then reconcile.
    pub async fn engine(&self) -> (SyncEngine, ReconcileOutcome) {
        self.engine_with(self.config()).await
    }

    /// Run the host startup hook.
    pub async fn hooks(&self) -> (HostHooks, ReconcileOutcome) {
        HostHooks::on_init(
            &self.settings(),
            self.provider.clone(),
            self.store.clone(),
            &NoOpProgress,
        )
        .await
        .expect("Failed to run startup hook")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Create N single-field records with ids `1..=count` and mod times 10 apart.
///
/// Texts use the given base text as a template (appending index).
pub fn create_test_records(count: usize, base_text: &str) -> Vec<Record> {
    (1..=count)
        .map(|i| {
            Record::new(
                i as NoteId,
                vec![format!("{} {}", base_text, i)],
                i as ModTime * 10,
            )
        })
        .collect()
}
