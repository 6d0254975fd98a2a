//! The sync engine.
//!
//! Owns the vector index and the sync metadata, reads the record store, and
//! calls the embedding provider one batch at a time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use vecsync_embeddings::{Embedding, EmbeddingError, EmbeddingProvider, EmbeddingRole};
use vecsync_query::{QueryError, SemanticSearch};
use vecsync_storage::RecordStore;
use vecsync_types::{ConfigError, ModTime, NoteId, Record};
use vecsync_vector::{
    HnswConfig, HnswIndex, SearchResult, SyncMetadata, SyncMetadataStore, VectorError,
    VectorIndex,
};

use crate::config::EngineConfig;
use crate::diff;
use crate::error::SyncError;
use crate::progress::ProgressSink;
use crate::state::{BatchStats, EngineState, EngineStatus, ModelChange, ReconcileOutcome};

/// Keeps one vector index in step with one record store.
///
/// Hosts hold a single engine in an `Arc` for the life of the process.
/// `reconcile` and `sync_batch` are serialized; `search`, `upsert_one` and
/// `delete_many` may run alongside them, and a search issued mid-sync may
/// miss records whose batch has not committed yet.
pub struct SyncEngine {
    config: EngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn RecordStore>,
    index: RwLock<HnswIndex>,
    metadata_store: SyncMetadataStore,
    metadata: Mutex<SyncMetadata>,
    state: Mutex<EngineState>,
    sync_lock: tokio::sync::Mutex<()>,
    /// Ids deleted while batches run; `None` outside a run
    deleted_mid_run: Mutex<Option<HashSet<NoteId>>>,
    dirty: AtomicBool,
}

impl SyncEngine {
    /// Open the index and the sync metadata without syncing.
    ///
    /// Fails with a configuration error when the provider's dimension
    /// disagrees with `embedding_size`, or when a populated index built by
    /// the same model has a different dimension. An index built by another
    /// model, or with another metric, is recreated empty.
    pub fn open(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let advertised = provider.info().dimension;
        if advertised != config.embedding_size {
            return Err(ConfigError::DimensionMismatch {
                expected: config.embedding_size,
                actual: advertised,
            }
            .into());
        }

        std::fs::create_dir_all(&config.index_path)?;
        let metadata_store =
            SyncMetadataStore::open(config.metadata_path()).map_err(SyncError::Metadata)?;
        let hnsw = HnswConfig::new(config.embedding_size, &config.index_path)
            .with_metric(config.metric);

        let (stored, created) = metadata_store
            .load_or_init(&config.model_name, config.embedding_size, config.metric)
            .map_err(SyncError::Metadata)?;

        let (index, metadata) = match stored {
            meta if created => {
                let index = match HnswIndex::open_or_create(hnsw.clone()) {
                    Ok(index) if index.is_empty() => index,
                    Ok(_) | Err(VectorError::DimensionMismatch { .. }) => {
                        warn!("Vector index has no sync metadata, starting over");
                        HnswIndex::create_fresh(hnsw)?
                    }
                    Err(e) => return Err(e.into()),
                };
                (index, meta)
            }
            mut meta => {
                let same_model = meta.model_name == config.model_name;
                if meta.dimension == config.embedding_size && meta.metric == config.metric {
                    (HnswIndex::open_or_create(hnsw)?, meta)
                } else if !same_model {
                    // reconcile() reports the model change and re-embeds everything
                    info!(
                        previous = %meta.model_name,
                        current = %config.model_name,
                        "Index layout changed with the model, recreating vector index"
                    );
                    (HnswIndex::create_fresh(hnsw)?, meta)
                } else {
                    if meta.dimension != config.embedding_size {
                        let existing = HnswIndex::open_or_create(
                            HnswConfig::new(meta.dimension, &config.index_path)
                                .with_metric(meta.metric),
                        )?;
                        if !existing.is_empty() {
                            return Err(ConfigError::DimensionMismatch {
                                expected: config.embedding_size,
                                actual: meta.dimension,
                            }
                            .into());
                        }
                    } else {
                        warn!(
                            from = %meta.metric,
                            to = %config.metric,
                            "Distance metric changed, rebuilding vector index"
                        );
                    }
                    meta.reset(&config.model_name, config.embedding_size, config.metric);
                    metadata_store.save(&meta).map_err(SyncError::Metadata)?;
                    (HnswIndex::create_fresh(hnsw)?, meta)
                }
            }
        };

        info!(
            model = %config.model_name,
            dim = config.embedding_size,
            vectors = index.len(),
            watermark = metadata.last_synced_watermark,
            "Opened sync engine"
        );

        Ok(Self {
            config,
            provider,
            store,
            index: RwLock::new(index),
            metadata_store,
            metadata: Mutex::new(metadata),
            state: Mutex::new(EngineState::Initializing),
            sync_lock: tokio::sync::Mutex::new(()),
            deleted_mid_run: Mutex::new(None),
            dirty: AtomicBool::new(false),
        })
    }

    /// Open the engine and run a first [`SyncEngine::reconcile`].
    pub async fn initialize(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn RecordStore>,
        progress: &dyn ProgressSink,
    ) -> Result<(Self, ReconcileOutcome), SyncError> {
        let engine = Self::open(config, provider, store)?;
        let outcome = engine.reconcile(progress).await?;
        Ok((engine, outcome))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    /// Snapshot of the sync metadata held in memory.
    pub fn sync_metadata(&self) -> SyncMetadata {
        lock(&self.metadata).clone()
    }

    pub fn watermark(&self) -> ModTime {
        lock(&self.metadata).last_synced_watermark
    }

    pub fn vector_count(&self) -> Result<usize, SyncError> {
        Ok(self.read_index()?.len())
    }

    pub fn contains(&self, id: NoteId) -> Result<bool, SyncError> {
        Ok(self.read_index()?.contains(id))
    }

    /// Bring the index up to date with the record store.
    ///
    /// Runs exclusively: a second call waits for the first and then usually
    /// finds nothing pending.
    pub async fn reconcile(&self, progress: &dyn ProgressSink) -> Result<ReconcileOutcome, SyncError> {
        let _guard = self.sync_lock.lock().await;
        let result = self.reconcile_locked(progress).await;
        self.set_state(EngineState::Reconciled);
        if let Err(e) = &result {
            error!(error = %e, "Sync pass aborted");
        }
        result
    }

    async fn reconcile_locked(
        &self,
        progress: &dyn ProgressSink,
    ) -> Result<ReconcileOutcome, SyncError> {
        let (stored_model, stored_watermark) = {
            let meta = lock(&self.metadata);
            (meta.model_name.clone(), meta.last_synced_watermark)
        };
        let mut outcome = ReconcileOutcome {
            watermark_before: stored_watermark,
            watermark_after: stored_watermark,
            ..Default::default()
        };
        let mut watermark = stored_watermark;

        if stored_model != self.config.model_name {
            self.set_state(EngineState::ModelMismatch);
            info!(
                previous = %stored_model,
                current = %self.config.model_name,
                "Embedding model changed, rebuilding vector index"
            );
            self.set_state(EngineState::Rebuilding);
            {
                let mut index = self.write_index()?;
                index.clear()?;
                index.save()?;
            }
            watermark = 0;
            outcome.model_change = Some(ModelChange {
                previous: stored_model,
                current: self.config.model_name.clone(),
            });
        }

        outcome.removed = self.remove_deleted()?;

        // Read before selecting: a record written after this point sits above
        // the new watermark and is picked up by the next pass
        let max_mod_time = self.store.max_mod_time()?.unwrap_or(0);
        let pending = {
            let index = self.read_index()?;
            diff::select_pending(
                self.store.as_ref(),
                self.config.diff_strategy,
                watermark,
                &|id| index.contains(id),
            )?
        };
        outcome.pending = pending.len();

        if pending.is_empty() {
            if outcome.model_change.is_some() {
                outcome.watermark_after = self.commit_metadata(true, max_mod_time, 0)?;
            }
            debug!(watermark, "Nothing pending");
            return Ok(outcome);
        }

        self.set_state(EngineState::Syncing);
        info!(
            pending = pending.len(),
            watermark,
            max_mod_time,
            strategy = ?self.config.diff_strategy,
            "Starting sync pass"
        );

        let stats = self.run_batches(&pending, progress).await?;
        self.save_index()?;

        if stats.cancelled {
            info!(
                processed = stats.processed,
                total = stats.total,
                "Sync cancelled, watermark unchanged"
            );
        } else {
            let target = diff::next_watermark(watermark, max_mod_time, stats.min_failed_mod_time);
            outcome.watermark_after =
                self.commit_metadata(outcome.model_change.is_some(), target, stats.indexed)?;
            if stats.failed > 0 {
                warn!(
                    failed = stats.failed,
                    failed_batches = stats.failed_batches,
                    watermark = outcome.watermark_after,
                    "Some batches failed, their records stay pending"
                );
            }
            info!(
                indexed = stats.indexed,
                skipped = stats.skipped,
                failed = stats.failed,
                elapsed_ms = stats.elapsed_ms,
                watermark = outcome.watermark_after,
                "Sync pass complete"
            );
        }

        outcome.stats = stats;
        Ok(outcome)
    }

    /// Embed and index `pending` in batches without touching the watermark.
    pub async fn sync_batch(
        &self,
        pending: &[Record],
        progress: &dyn ProgressSink,
    ) -> Result<BatchStats, SyncError> {
        let _guard = self.sync_lock.lock().await;
        self.set_state(EngineState::Syncing);
        let result = async {
            let stats = self.run_batches(pending, progress).await?;
            self.save_index()?;
            Ok::<BatchStats, SyncError>(stats)
        }
        .await;
        self.set_state(EngineState::Reconciled);
        result
    }

    async fn run_batches(
        &self,
        pending: &[Record],
        progress: &dyn ProgressSink,
    ) -> Result<BatchStats, SyncError> {
        *lock(&self.deleted_mid_run) = Some(HashSet::new());
        let result = self.run_batches_tracked(pending, progress).await;
        *lock(&self.deleted_mid_run) = None;
        result
    }

    async fn run_batches_tracked(
        &self,
        pending: &[Record],
        progress: &dyn ProgressSink,
    ) -> Result<BatchStats, SyncError> {
        let started = Instant::now();
        let mut stats = BatchStats::new(pending.len());
        let batches_total = pending.len().div_ceil(self.config.batch_size);

        for (batch_no, chunk) in pending.chunks(self.config.batch_size).enumerate() {
            if progress.is_cancelled() {
                stats.cancelled = true;
                info!(batch = batch_no, "Cancellation requested");
                break;
            }
            self.embed_batch(batch_no, chunk, &mut stats).await?;
            stats.processed += chunk.len();
            progress.on_progress(&stats.progress(batch_no + 1, batches_total));
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn embed_batch(
        &self,
        batch_no: usize,
        chunk: &[Record],
        stats: &mut BatchStats,
    ) -> Result<(), SyncError> {
        let (blank, docs): (Vec<&Record>, Vec<&Record>) = chunk.iter().partition(|r| r.is_blank());

        if !blank.is_empty() {
            let ids: Vec<NoteId> = blank.iter().map(|r| r.id).collect();
            if self.write_index()?.delete_many(&ids)? > 0 {
                self.dirty.store(true, Ordering::SeqCst);
            }
            stats.skipped += blank.len();
            debug!(batch = batch_no, ids = ?ids, "Skipped blank records");
        }
        if docs.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = docs.iter().map(|r| r.document_text()).collect();
        stats.batches += 1;

        match self.embed_checked(&texts, EmbeddingRole::Document).await {
            Ok(embeddings) => {
                let vectors: Vec<(NoteId, Embedding)> =
                    docs.iter().map(|r| r.id).zip(embeddings).collect();
                // Checked under the index write lock that delete_many also takes
                let (written, dropped) = {
                    let mut index = self.write_index()?;
                    let (vectors, dropped): (Vec<_>, Vec<_>) = {
                        let deleted = lock(&self.deleted_mid_run);
                        vectors.into_iter().partition(|(id, _)| {
                            !deleted.as_ref().is_some_and(|ids| ids.contains(id))
                        })
                    };
                    index.upsert_batch(&vectors)?;
                    (vectors.len(), dropped.len())
                };
                self.dirty.store(true, Ordering::SeqCst);
                stats.indexed += written;
                stats.skipped += dropped;
                if dropped > 0 {
                    debug!(batch = batch_no, dropped, "Dropped records deleted during the batch");
                }
                debug!(batch = batch_no, count = written, "Indexed batch");
            }
            Err(SyncError::Provider(e)) => {
                let ids: Vec<NoteId> = docs.iter().map(|r| r.id).collect();
                warn!(
                    batch = batch_no,
                    ids = ?ids,
                    error = %e,
                    "Embedding batch failed, leaving its records for the next pass"
                );
                let min_mod_time = docs.iter().map(|r| r.mod_time).min().unwrap_or_default();
                stats.record_failed(docs.len(), min_mod_time);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Embed `texts` and validate the provider's answer.
    ///
    /// A wrong vector count is a provider error; a wrong vector length is a
    /// configuration error.
    async fn embed_checked(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> Result<Vec<Embedding>, SyncError> {
        let embeddings = self.provider.embed(texts, role).await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            }
            .into());
        }
        if let Some(bad) = embeddings
            .iter()
            .find(|e| e.dimension() != self.config.embedding_size)
        {
            return Err(ConfigError::DimensionMismatch {
                expected: self.config.embedding_size,
                actual: bad.dimension(),
            }
            .into());
        }
        Ok(embeddings)
    }

    /// Drop vectors of records the store reports as deleted, then let the
    /// store forget those tombstones.
    fn remove_deleted(&self) -> Result<usize, SyncError> {
        let deleted = self.store.deleted_record_ids()?;
        if deleted.is_empty() {
            return Ok(0);
        }
        let removed = {
            let mut index = self.write_index()?;
            let removed = index.delete_many(&deleted)?;
            // Saved even when nothing was removed: the tombstones go next
            index.save()?;
            removed
        };
        let pruned = self.store.forget_deleted(&deleted)?;
        if removed > 0 || pruned > 0 {
            info!(removed, pruned, "Removed vectors of deleted records");
        }
        Ok(removed)
    }

    /// Persist the model name and the new watermark. Returns the stored watermark.
    fn commit_metadata(
        &self,
        model_changed: bool,
        watermark: ModTime,
        indexed: usize,
    ) -> Result<ModTime, SyncError> {
        let snapshot = {
            let mut meta = lock(&self.metadata);
            if model_changed || meta.model_name != self.config.model_name {
                meta.reset(
                    &self.config.model_name,
                    self.config.embedding_size,
                    self.config.metric,
                );
            }
            meta.advance(watermark, indexed as u64);
            meta.clone()
        };
        self.metadata_store
            .save(&snapshot)
            .map_err(SyncError::Metadata)?;
        Ok(snapshot.last_synced_watermark)
    }

    /// Index one created or updated record.
    ///
    /// Failures are logged, never raised: the record keeps a `mod_time` above
    /// the watermark, so the next reconcile retries it. Success here never
    /// advances the watermark. Returns whether a vector was written.
    pub async fn upsert_one(&self, id: NoteId, fields: &[String]) -> bool {
        let text = fields.join(" ");
        if text.trim().is_empty() {
            match self.remove_one(id) {
                Ok(_) => debug!(note_id = id, "Blank record, nothing to embed"),
                Err(e) => warn!(note_id = id, error = %e, "Failed to drop vector of blank record"),
            }
            return false;
        }

        let result = async {
            let embedding = self
                .embed_checked(&[text], EmbeddingRole::Document)
                .await?
                .remove(0);
            self.write_index()?.upsert(id, &embedding)?;
            Ok::<(), SyncError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.dirty.store(true, Ordering::SeqCst);
                debug!(note_id = id, "Indexed record");
                true
            }
            Err(e) => {
                warn!(note_id = id, error = %e, "Failed to index record, next sync retries it");
                false
            }
        }
    }

    fn remove_one(&self, id: NoteId) -> Result<bool, SyncError> {
        let removed = self.write_index()?.remove(id)?;
        if removed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    /// Remove vectors for `ids` and persist the index.
    ///
    /// Absent ids are ignored and errors are logged, so this never fails the
    /// caller. Returns how many vectors were removed.
    pub fn delete_many(&self, ids: &[NoteId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let result = self.write_index().and_then(|mut index| -> Result<usize, SyncError> {
            if let Some(deleted) = lock(&self.deleted_mid_run).as_mut() {
                deleted.extend(ids.iter().copied());
            }
            let removed = index.delete_many(ids)?;
            if removed > 0 {
                index.save()?;
            }
            Ok(removed)
        });
        match result {
            Ok(removed) => {
                debug!(requested = ids.len(), removed, "Deleted vectors");
                removed
            }
            Err(e) => {
                error!(ids = ?ids, error = %e, "Failed to delete vectors");
                0
            }
        }
    }

    /// Nearest records to `query_text`, closest first, at most `k`.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<NoteId>, SyncError> {
        Ok(self
            .search_scored(query_text, k)
            .await?
            .into_iter()
            .map(|r| r.note_id)
            .collect())
    }

    /// Like [`SyncEngine::search`], with distances.
    pub async fn search_scored(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>, SyncError> {
        if k == 0 || query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = self
            .embed_checked(&[query_text.to_string()], EmbeddingRole::Query)
            .await?
            .remove(0);
        let results = self.read_index()?.search(&query, k)?;
        debug!(k, found = results.len(), "Vector search");
        Ok(results)
    }

    /// Persist the index if live upserts changed it.
    pub fn flush(&self) -> Result<(), SyncError> {
        if self.dirty.load(Ordering::SeqCst) {
            self.save_index()?;
        }
        Ok(())
    }

    fn save_index(&self) -> Result<(), SyncError> {
        // Cleared first so writes racing the save mark the index dirty again
        let was_dirty = self.dirty.swap(false, Ordering::SeqCst);
        let saved = self
            .read_index()
            .and_then(|index| index.save().map_err(SyncError::from));
        if saved.is_err() && was_dirty {
            self.dirty.store(true, Ordering::SeqCst);
        }
        saved
    }

    pub fn status(&self) -> Result<EngineStatus, SyncError> {
        let meta = self.sync_metadata();
        let stats = self.read_index()?.stats();
        let since = if meta.model_name == self.config.model_name {
            meta.last_synced_watermark
        } else {
            0
        };
        let pending = self.store.count_modified_since(since)?;

        Ok(EngineStatus {
            state: self.state(),
            model_name: self.config.model_name.clone(),
            indexed_model_name: meta.model_name,
            watermark: meta.last_synced_watermark,
            dimension: stats.dimension,
            metric: self.config.metric,
            diff_strategy: self.config.diff_strategy,
            vector_count: stats.vector_count,
            index_size_bytes: stats.size_bytes,
            pending,
            embedded_count: meta.embedded_count,
        })
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
        debug!(state = %state, "Engine state");
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, HnswIndex>, SyncError> {
        self.index
            .read()
            .map_err(|_| SyncError::LockPoisoned("vector index"))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, HnswIndex>, SyncError> {
        self.index
            .write()
            .map_err(|_| SyncError::LockPoisoned("vector index"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SemanticSearch for SyncEngine {
    async fn search_ids(&self, text: &str, k: usize) -> Result<Vec<NoteId>, QueryError> {
        self.search(text, k)
            .await
            .map_err(|e| QueryError::Search(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tempfile::TempDir;
    use vecsync_embeddings::MockEmbedder;
    use vecsync_storage::{RecordDb, StorageError};
    use vecsync_types::DiffStrategy;

    use crate::progress::{CancellableProgress, NoOpProgress, SyncProgress};

    const DIM: usize = 64;

    struct Fixture {
        temp: TempDir,
        store: Arc<RecordDb>,
        provider: Arc<MockEmbedder>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = Arc::new(RecordDb::open(&temp.path().join("records")).unwrap());
            let provider = Arc::new(MockEmbedder::new("mock-embed", DIM));
            Self {
                temp,
                store,
                provider,
            }
        }

        fn config(&self) -> EngineConfig {
            EngineConfig::new("mock-embed", DIM, self.temp.path().join("index"))
        }

        fn put(&self, id: NoteId, text: &str, mod_time: ModTime) {
            self.store
                .put_record(&Record::new(id, vec![text.to_string()], mod_time))
                .unwrap();
        }

        fn open(&self, config: EngineConfig) -> SyncEngine {
            SyncEngine::open(config, self.provider.clone(), self.store.clone()).unwrap()
        }

        async fn initialize(&self, config: EngineConfig) -> (SyncEngine, ReconcileOutcome) {
            SyncEngine::initialize(config, self.provider.clone(), self.store.clone(), &NoOpProgress)
                .await
                .unwrap()
        }

        fn documents_embedded(&self) -> usize {
            self.provider.texts_embedded(EmbeddingRole::Document)
        }
    }

    /// Cancels once `limit` batches have reported.
    struct CancelAfter {
        limit: usize,
        seen: AtomicUsize,
    }

    impl ProgressSink for CancelAfter {
        fn on_progress(&self, _progress: &SyncProgress) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.seen.load(Ordering::SeqCst) >= self.limit
        }
    }

    /// Record store whose reads always fail.
    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn count_modified_since(&self, _watermark: ModTime) -> Result<u64, StorageError> {
            Err(StorageError::Key("broken".to_string()))
        }
        fn max_mod_time(&self) -> Result<Option<ModTime>, StorageError> {
            Err(StorageError::Key("broken".to_string()))
        }
        fn records_modified_since(&self, _watermark: ModTime) -> Result<Vec<Record>, StorageError> {
            Err(StorageError::Key("broken".to_string()))
        }
        fn records_missing_from(
            &self,
            _indexed: &dyn Fn(NoteId) -> bool,
        ) -> Result<Vec<Record>, StorageError> {
            Err(StorageError::Key("broken".to_string()))
        }
        fn deleted_record_ids(&self) -> Result<Vec<NoteId>, StorageError> {
            Ok(Vec::new())
        }
    }

    /// Record store that writes one more record while a scan is running.
    struct RacingStore {
        inner: Arc<RecordDb>,
        late: Mutex<Option<Record>>,
    }

    impl RacingStore {
        fn new(inner: Arc<RecordDb>, late: Record) -> Self {
            Self {
                inner,
                late: Mutex::new(Some(late)),
            }
        }
    }

    impl RecordStore for RacingStore {
        fn count_modified_since(&self, watermark: ModTime) -> Result<u64, StorageError> {
            self.inner.count_modified_since(watermark)
        }
        fn max_mod_time(&self) -> Result<Option<ModTime>, StorageError> {
            self.inner.max_mod_time()
        }
        fn records_modified_since(&self, watermark: ModTime) -> Result<Vec<Record>, StorageError> {
            let records = self.inner.records_modified_since(watermark)?;
            if let Some(late) = lock(&self.late).take() {
                self.inner.put_record(&late)?;
            }
            Ok(records)
        }
        fn records_missing_from(
            &self,
            indexed: &dyn Fn(NoteId) -> bool,
        ) -> Result<Vec<Record>, StorageError> {
            self.inner.records_missing_from(indexed)
        }
        fn deleted_record_ids(&self) -> Result<Vec<NoteId>, StorageError> {
            self.inner.deleted_record_ids()
        }
    }

    /// Provider that deletes one record through the engine while embedding.
    struct DeletingEmbedder {
        inner: MockEmbedder,
        engine: std::sync::OnceLock<Arc<SyncEngine>>,
        victim: NoteId,
    }

    #[async_trait]
    impl EmbeddingProvider for DeletingEmbedder {
        fn info(&self) -> &vecsync_embeddings::ModelInfo {
            self.inner.info()
        }

        async fn embed(
            &self,
            texts: &[String],
            role: EmbeddingRole,
        ) -> Result<Vec<Embedding>, EmbeddingError> {
            if role == EmbeddingRole::Document {
                if let Some(engine) = self.engine.get() {
                    engine.delete_many(&[self.victim]);
                }
            }
            self.inner.embed(texts, role).await
        }
    }

    #[tokio::test]
    async fn test_initialize_embeds_everything() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        fx.put(3, "sun sol", 150);

        let (engine, outcome) = fx.initialize(fx.config()).await;

        assert_eq!(outcome.pending, 3);
        assert_eq!(outcome.stats.indexed, 3);
        assert_eq!(outcome.watermark_after, 200);
        assert_eq!(engine.watermark(), 200);
        assert_eq!(engine.vector_count().unwrap(), 3);
        assert_eq!(engine.state(), EngineState::Reconciled);
        assert_eq!(fx.documents_embedded(), 3);
    }

    #[tokio::test]
    async fn test_documents_use_document_role_and_joined_fields() {
        let fx = Fixture::new();
        fx.store
            .put_record(&Record::from_flds(1, "cat\u{1f}gato", 10))
            .unwrap();
        fx.initialize(fx.config()).await;

        let calls = fx.provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].role, EmbeddingRole::Document);
        assert_eq!(calls[0].inputs, vec!["search_document: cat gato".to_string()]);
    }

    #[tokio::test]
    async fn test_second_reconcile_is_noop() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        let (engine, _) = fx.initialize(fx.config()).await;
        let calls = fx.provider.call_count();

        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(fx.provider.call_count(), calls);
        assert_eq!(engine.watermark(), 200);
    }

    #[tokio::test]
    async fn test_one_provider_call_per_batch() {
        let fx = Fixture::new();
        for id in 1..=5 {
            fx.put(id, &format!("record number {}", id), id as ModTime);
        }
        let (_engine, outcome) = fx.initialize(fx.config().with_batch_size(2)).await;

        assert_eq!(fx.provider.call_count(), 3);
        assert_eq!(outcome.stats.batches, 3);
        assert_eq!(outcome.stats.indexed, 5);
    }

    #[tokio::test]
    async fn test_only_modified_records_are_resynced() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        let (engine, _) = fx.initialize(fx.config()).await;
        fx.provider.reset_calls();

        fx.put(2, "fig leaf tree", 300);
        fx.put(3, "sun sol", 250);
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();

        assert_eq!(outcome.pending, 2);
        assert_eq!(
            fx.provider.calls()[0].inputs,
            vec![
                "search_document: sun sol".to_string(),
                "search_document: fig leaf tree".to_string()
            ]
        );
        assert_eq!(engine.watermark(), 300);
    }

    #[tokio::test]
    async fn test_failed_batch_holds_watermark_and_is_retried() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.put(2, "poison apple", 20);
        fx.put(3, "fig leaf", 30);
        fx.provider.fail_on("poison");

        let (engine, outcome) = fx.initialize(fx.config().with_batch_size(1)).await;
        assert_eq!(outcome.stats.indexed, 2);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.failed_batches, 1);
        assert_eq!(engine.watermark(), 19);
        assert!(engine.contains(1).unwrap());
        assert!(!engine.contains(2).unwrap());
        assert!(engine.contains(3).unwrap());

        fx.provider.recover();
        fx.provider.reset_calls();
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 2);
        assert_eq!(outcome.stats.failed, 0);
        assert!(engine.contains(2).unwrap());
        assert_eq!(engine.watermark(), 30);
        assert_eq!(fx.documents_embedded(), 2);
    }

    #[tokio::test]
    async fn test_provider_outage_holds_watermark() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.put(2, "fig leaf", 20);
        fx.provider.fail_all();

        let (engine, outcome) = fx.initialize(fx.config()).await;
        assert_eq!(outcome.stats.failed, 2);
        assert_eq!(engine.watermark(), 9);
        assert_eq!(engine.vector_count().unwrap(), 0);

        fx.provider.recover();
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 2);
        assert_eq!(engine.watermark(), 20);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_watermark_untouched() {
        let fx = Fixture::new();
        for id in 1..=3 {
            fx.put(id, &format!("record number {}", id), id as ModTime * 10);
        }
        let engine = fx.open(fx.config().with_batch_size(1));
        let sink = CancelAfter {
            limit: 1,
            seen: AtomicUsize::new(0),
        };

        let outcome = engine.reconcile(&sink).await.unwrap();
        assert!(outcome.cancelled());
        assert_eq!(outcome.stats.indexed, 1);
        assert_eq!(engine.watermark(), 0);
        assert_eq!(engine.vector_count().unwrap(), 1);
        assert_eq!(engine.state(), EngineState::Reconciled);

        // The whole pending set, committed record included, is retried
        fx.provider.reset_calls();
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 3);
        assert_eq!(fx.documents_embedded(), 3);
        assert_eq!(engine.watermark(), 30);
    }

    #[tokio::test]
    async fn test_cancel_before_start_does_nothing() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        let engine = fx.open(fx.config());
        let progress = CancellableProgress::new(NoOpProgress);
        progress.token().cancel();

        let outcome = engine.reconcile(&progress).await.unwrap();
        assert!(outcome.cancelled());
        assert_eq!(fx.provider.call_count(), 0);
        assert_eq!(engine.watermark(), 0);
    }

    #[tokio::test]
    async fn test_model_change_rebuilds_index() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        {
            let (engine, _) = fx.initialize(fx.config()).await;
            assert_eq!(engine.sync_metadata().model_name, "mock-embed");
        }

        let provider = Arc::new(MockEmbedder::new("other-embed", DIM));
        let config = EngineConfig::new("other-embed", DIM, fx.temp.path().join("index"));
        let (engine, outcome) = SyncEngine::initialize(
            config,
            provider.clone(),
            fx.store.clone(),
            &NoOpProgress,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.model_change,
            Some(ModelChange {
                previous: "mock-embed".to_string(),
                current: "other-embed".to_string(),
            })
        );
        assert_eq!(outcome.stats.indexed, 2);
        assert_eq!(provider.texts_embedded(EmbeddingRole::Document), 2);
        assert_eq!(engine.sync_metadata().model_name, "other-embed");
        assert_eq!(engine.watermark(), 200);
    }

    #[tokio::test]
    async fn test_model_change_with_new_dimension() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        drop(fx.initialize(fx.config()).await);

        let provider = Arc::new(MockEmbedder::new("wide-embed", 2 * DIM));
        let config = EngineConfig::new("wide-embed", 2 * DIM, fx.temp.path().join("index"));
        let (engine, outcome) =
            SyncEngine::initialize(config, provider, fx.store.clone(), &NoOpProgress)
                .await
                .unwrap();

        assert!(outcome.model_change.is_some());
        assert_eq!(engine.status().unwrap().dimension, 2 * DIM);
        assert!(engine.contains(1).unwrap());
    }

    #[tokio::test]
    async fn test_same_model_new_dimension_is_config_error() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        drop(fx.initialize(fx.config()).await);

        let provider = Arc::new(MockEmbedder::new("mock-embed", 2 * DIM));
        let config = EngineConfig::new("mock-embed", 2 * DIM, fx.temp.path().join("index"));
        let result = SyncEngine::open(config, provider, fx.store.clone());
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::DimensionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_provider_dimension_disagreeing_with_config() {
        let fx = Fixture::new();
        let config = EngineConfig::new("mock-embed", DIM + 1, fx.temp.path().join("index"));
        let result = SyncEngine::open(config, fx.provider.clone(), fx.store.clone());
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_wrong_vector_length_aborts_sync() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let engine = fx.open(fx.config());
        fx.provider.emit_dimension(DIM / 2);

        let result = engine.reconcile(&NoOpProgress).await;
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::DimensionMismatch { .. }))
        ));
        assert_eq!(engine.watermark(), 0);
    }

    #[tokio::test]
    async fn test_storage_error_aborts_without_advancing() {
        let fx = Fixture::new();
        let engine =
            SyncEngine::open(fx.config(), fx.provider.clone(), Arc::new(BrokenStore)).unwrap();

        let result = engine.reconcile(&NoOpProgress).await;
        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(engine.watermark(), 0);
    }

    #[tokio::test]
    async fn test_blank_records_are_skipped() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.store
            .put_record(&Record::new(2, vec![String::new(), "  ".to_string()], 20))
            .unwrap();

        let (engine, outcome) = fx.initialize(fx.config()).await;
        assert_eq!(outcome.stats.skipped, 1);
        assert_eq!(outcome.stats.indexed, 1);
        assert_eq!(fx.documents_embedded(), 1);
        assert_eq!(engine.watermark(), 20);
    }

    #[tokio::test]
    async fn test_upsert_one_does_not_move_watermark() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let (engine, _) = fx.initialize(fx.config()).await;

        fx.put(2, "fig leaf", 200);
        assert!(engine.upsert_one(2, &["fig leaf".to_string()]).await);
        assert!(engine.contains(2).unwrap());
        assert_eq!(engine.watermark(), 100);
        assert_eq!(
            fx.provider.calls().last().unwrap().role,
            EmbeddingRole::Document
        );

        // The bulk path still owns the watermark
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 1);
        assert_eq!(engine.watermark(), 200);
    }

    #[tokio::test]
    async fn test_upsert_one_failure_is_swallowed() {
        let fx = Fixture::new();
        let (engine, _) = fx.initialize(fx.config()).await;
        fx.provider.fail_all();

        fx.put(5, "cat gato", 500);
        assert!(!engine.upsert_one(5, &["cat gato".to_string()]).await);
        assert!(!engine.contains(5).unwrap());

        fx.provider.recover();
        engine.reconcile(&NoOpProgress).await.unwrap();
        assert!(engine.contains(5).unwrap());
    }

    #[tokio::test]
    async fn test_upsert_one_blank_drops_vector() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let (engine, _) = fx.initialize(fx.config()).await;

        assert!(!engine.upsert_one(1, &[" ".to_string()]).await);
        assert!(!engine.contains(1).unwrap());
    }

    #[tokio::test]
    async fn test_delete_many_is_idempotent() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        let (engine, _) = fx.initialize(fx.config()).await;

        assert_eq!(engine.delete_many(&[1, 42]), 1);
        assert_eq!(engine.delete_many(&[1, 42]), 0);
        assert_eq!(engine.delete_many(&[]), 0);

        let ids = engine.search("cat", 10).await.unwrap();
        assert!(!ids.contains(&1));
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_tombstones_propagate_on_reconcile() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        fx.put(2, "fig leaf", 200);
        let (engine, _) = fx.initialize(fx.config()).await;

        fx.store.delete_records(&[1]).unwrap();
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(!engine.contains(1).unwrap());

        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn test_tombstones_are_pruned_after_reconcile() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let (engine, _) = fx.initialize(fx.config()).await;

        fx.store.delete_records(&[1]).unwrap();
        assert_eq!(fx.store.deleted_record_ids().unwrap(), vec![1]);
        engine.reconcile(&NoOpProgress).await.unwrap();
        assert!(fx.store.deleted_record_ids().unwrap().is_empty());

        // Pruning survives a restart without resurrecting the vector
        drop(engine);
        let engine = fx.open(fx.config());
        assert!(!engine.contains(1).unwrap());
    }

    #[tokio::test]
    async fn test_record_written_during_scan_is_not_skipped() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let store = Arc::new(RacingStore::new(
            fx.store.clone(),
            Record::new(7, vec!["fig leaf".to_string()], 500),
        ));
        let engine = SyncEngine::open(fx.config(), fx.provider.clone(), store).unwrap();

        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 1);
        assert_eq!(engine.watermark(), 100);
        assert!(!engine.contains(7).unwrap());

        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 1);
        assert!(engine.contains(7).unwrap());
        assert_eq!(engine.watermark(), 500);
    }

    #[tokio::test]
    async fn test_delete_during_batch_is_not_undone() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.put(2, "fig leaf", 20);
        let provider = Arc::new(DeletingEmbedder {
            inner: MockEmbedder::new("mock-embed", DIM),
            engine: std::sync::OnceLock::new(),
            victim: 2,
        });
        let engine = Arc::new(
            SyncEngine::open(fx.config(), provider.clone(), fx.store.clone()).unwrap(),
        );
        assert!(provider.engine.set(engine.clone()).is_ok());

        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.stats.indexed, 1);
        assert_eq!(outcome.stats.skipped, 1);
        assert!(engine.contains(1).unwrap());
        assert!(!engine.contains(2).unwrap());
        assert_eq!(engine.search("fig leaf", 5).await.unwrap(), vec![1]);

        // Outside a run, a re-upsert after delete is the host's call
        assert!(engine.upsert_one(2, &["fig leaf".to_string()]).await);
        assert!(engine.contains(2).unwrap());
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.put(2, "fig leaf", 20);
        fx.put(3, "sun sol", 30);
        let (engine, _) = fx.initialize(fx.config()).await;

        let scored = engine.search_scored("cat", 3).await.unwrap();
        let ids: Vec<NoteId> = scored.iter().map(|r| r.note_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for pair in scored.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }

        assert_eq!(engine.search("cat", 2).await.unwrap(), vec![1, 2]);
        assert!(engine.search("cat", 0).await.unwrap().is_empty());
        assert_eq!(
            fx.provider.calls().last().unwrap().inputs,
            vec!["search_query: cat".to_string()]
        );
    }

    #[tokio::test]
    async fn test_search_surfaces_provider_error() {
        let fx = Fixture::new();
        let (engine, _) = fx.initialize(fx.config()).await;
        fx.provider.fail_all();

        let err = engine.search("cat", 5).await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_absence_strategy_picks_up_missing_vectors() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 10);
        fx.put(2, "fig leaf", 20);
        let config = fx.config().with_diff_strategy(DiffStrategy::Absence);
        let (engine, outcome) = fx.initialize(config).await;
        assert_eq!(outcome.stats.indexed, 2);

        assert!(engine.reconcile(&NoOpProgress).await.unwrap().is_noop());

        engine.delete_many(&[2]);
        fx.provider.reset_calls();
        let outcome = engine.reconcile(&NoOpProgress).await.unwrap();
        assert_eq!(outcome.pending, 1);
        assert_eq!(
            fx.provider.calls()[0].inputs,
            vec!["search_document: fig leaf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        {
            let (engine, _) = fx.initialize(fx.config()).await;
            fx.put(2, "fig leaf", 200);
            engine.upsert_one(2, &["fig leaf".to_string()]).await;
            engine.flush().unwrap();
        }

        let engine = fx.open(fx.config());
        assert_eq!(engine.watermark(), 100);
        assert_eq!(engine.vector_count().unwrap(), 2);
        assert_eq!(engine.state(), EngineState::Initializing);
    }

    #[tokio::test]
    async fn test_status_reports_pending() {
        let fx = Fixture::new();
        fx.put(1, "cat gato", 100);
        let (engine, _) = fx.initialize(fx.config()).await;
        fx.put(2, "fig leaf", 200);

        let status = engine.status().unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.vector_count, 1);
        assert_eq!(status.watermark, 100);
        assert_eq!(status.indexed_model_name, "mock-embed");
        assert_eq!(status.dimension, DIM);
    }

    #[tokio::test]
    async fn test_sync_batch_leaves_watermark() {
        let fx = Fixture::new();
        let engine = fx.open(fx.config());
        let records = vec![Record::new(9, vec!["cat gato".to_string()], 900)];

        let stats = engine.sync_batch(&records, &NoOpProgress).await.unwrap();
        assert_eq!(stats.indexed, 1);
        assert!(engine.contains(9).unwrap());
        assert_eq!(engine.watermark(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reconciles_do_not_duplicate_work() {
        let fx = Fixture::new();
        for id in 1..=4 {
            fx.put(id, &format!("record number {}", id), id as ModTime);
        }
        let engine = Arc::new(fx.open(fx.config().with_batch_size(1)));

        let (a, b) = tokio::join!(
            engine.reconcile(&NoOpProgress),
            engine.reconcile(&NoOpProgress)
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(fx.documents_embedded(), 4);
        assert_eq!(engine.watermark(), 4);
    }

    #[tokio::test]
    async fn test_semantic_search_seam() {
        let fx = Fixture::new();
        fx.put(5, "cat gato", 10);
        fx.put(9, "fig leaf", 20);
        let (engine, _) = fx.initialize(fx.config()).await;

        let rewritten = vecsync_query::rewrite_query(&engine, "deck:math vec:cat", "vec:", "nid", 1)
            .await
            .unwrap();
        assert_eq!(rewritten, "deck:math (nid:5)");
    }
}
