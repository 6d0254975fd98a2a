//! Host lifecycle hooks.
//!
//! A host application holds one [`HostHooks`] and calls it from its own
//! events: startup, record edits, record deletion, search and shutdown.
//! None of the per-event hooks fail the host; errors are logged and the
//! next reconcile repairs whatever was missed.

use std::sync::Arc;

use tracing::{info, warn};

use vecsync_embeddings::EmbeddingProvider;
use vecsync_query::{QueryRewriter, RewriterConfig};
use vecsync_storage::RecordStore;
use vecsync_types::{NoteId, Settings};

use crate::config::EngineConfig;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::progress::ProgressSink;
use crate::state::ReconcileOutcome;

/// Engine and query rewriter wired together for a host.
pub struct HostHooks {
    engine: Arc<SyncEngine>,
    rewriter: QueryRewriter<Arc<SyncEngine>>,
}

impl HostHooks {
    /// Wrap an already opened engine.
    pub fn new(engine: Arc<SyncEngine>, rewriter: RewriterConfig) -> Self {
        let rewriter = QueryRewriter::new(engine.clone(), rewriter);
        Self { engine, rewriter }
    }

    /// Startup hook: open the engine from `settings` and run the initial reconcile.
    ///
    /// Configuration errors are returned and should abort startup. A model
    /// change is reported in the outcome after the index has been rebuilt.
    pub async fn on_init(
        settings: &Settings,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn RecordStore>,
        progress: &dyn ProgressSink,
    ) -> Result<(Self, ReconcileOutcome), SyncError> {
        let config = EngineConfig::from_settings(settings);
        let (engine, outcome) = SyncEngine::initialize(config, provider, store, progress).await?;
        if let Some(change) = &outcome.model_change {
            info!(
                previous = %change.previous,
                current = %change.current,
                "Vector index rebuilt for new embedding model"
            );
        }
        let hooks = Self::new(Arc::new(engine), RewriterConfig::from_settings(settings));
        Ok((hooks, outcome))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn rewriter(&self) -> &QueryRewriter<Arc<SyncEngine>> {
        &self.rewriter
    }

    /// A record was created or edited. Returns whether its vector was written.
    pub async fn on_record_created_or_updated(&self, id: NoteId, fields: &[String]) -> bool {
        self.engine.upsert_one(id, fields).await
    }

    /// Records were deleted. Returns how many vectors were removed.
    pub fn on_records_deleted(&self, ids: &[NoteId]) -> usize {
        self.engine.delete_many(ids)
    }

    /// Rewrite a search string before the host runs it.
    ///
    /// Always yields a runnable query: when vector search is unavailable
    /// the semantic clause becomes a filter that matches nothing.
    pub async fn on_search_query(&self, text: &str) -> String {
        self.rewriter.rewrite_or_match_nothing(text).await
    }

    /// Shutdown hook: persist live upserts.
    pub fn on_shutdown(&self) {
        if let Err(e) = self.engine.flush() {
            warn!(error = %e, "Failed to persist vector index on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;
    use vecsync_embeddings::MockEmbedder;
    use vecsync_storage::RecordDb;
    use vecsync_types::Record;

    use crate::progress::NoOpProgress;

    fn settings(temp: &TempDir) -> Settings {
        Settings {
            model_name: "mock-embed".to_string(),
            embedding_size: 64,
            search_results_limit: 2,
            index_path: temp.path().join("index").to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    async fn hooks_with(
        temp: &TempDir,
        records: &[(NoteId, &str, i64)],
    ) -> (HostHooks, Arc<MockEmbedder>, Arc<RecordDb>) {
        let store = Arc::new(RecordDb::open(&temp.path().join("records")).unwrap());
        for (id, text, mod_time) in records {
            store
                .put_record(&Record::new(*id, vec![text.to_string()], *mod_time))
                .unwrap();
        }
        let provider = Arc::new(MockEmbedder::new("mock-embed", 64));
        let (hooks, _) = HostHooks::on_init(
            &settings(temp),
            provider.clone(),
            store.clone(),
            &NoOpProgress,
        )
        .await
        .unwrap();
        (hooks, provider, store)
    }

    #[tokio::test]
    async fn test_on_init_syncs_existing_records() {
        let temp = TempDir::new().unwrap();
        let (hooks, _, _) = hooks_with(&temp, &[(1, "cat gato", 10), (2, "fig leaf", 20)]).await;
        assert_eq!(hooks.engine().vector_count().unwrap(), 2);
        assert_eq!(hooks.engine().watermark(), 20);
    }

    #[tokio::test]
    async fn test_search_query_rewrite() {
        let temp = TempDir::new().unwrap();
        let (hooks, _, _) = hooks_with(
            &temp,
            &[(5, "cat gato", 10), (9, "fig leaf", 20), (12, "sun sol", 30)],
        )
        .await;

        assert_eq!(
            hooks.on_search_query("deck:math vec:cat").await,
            "deck:math (nid:5 OR nid:9)"
        );
        assert_eq!(hooks.on_search_query("vec:cat").await, "(nid:5 OR nid:9)");
        assert_eq!(hooks.on_search_query("  deck:math  ").await, "deck:math");
        assert_eq!(hooks.on_search_query("deck:math vec:").await, "deck:math (nid:0)");
    }

    #[tokio::test]
    async fn test_search_query_falls_back_when_provider_down() {
        let temp = TempDir::new().unwrap();
        let (hooks, provider, _) = hooks_with(&temp, &[(5, "cat gato", 10)]).await;
        provider.fail_all();

        assert_eq!(
            hooks.on_search_query("tag:x vec:cat").await,
            "tag:x (nid:0)"
        );
        assert_eq!(hooks.on_search_query("tag:x").await, "tag:x");
    }

    #[tokio::test]
    async fn test_edit_and_delete_hooks() {
        let temp = TempDir::new().unwrap();
        let (hooks, _, store) = hooks_with(&temp, &[(1, "cat gato", 10)]).await;

        store
            .put_record(&Record::new(2, vec!["fig leaf".to_string()], 20))
            .unwrap();
        assert!(
            hooks
                .on_record_created_or_updated(2, &["fig leaf".to_string()])
                .await
        );
        assert!(hooks.engine().contains(2).unwrap());

        assert_eq!(hooks.on_records_deleted(&[1, 2, 3]), 2);
        assert_eq!(hooks.engine().vector_count().unwrap(), 0);
        assert_eq!(hooks.on_search_query("vec:cat").await, "(nid:0)");
        hooks.on_shutdown();
    }
}
