//! Query rewrite E2E tests for vecsync.
//!
//! The rewritten string must always be runnable by the host, and a
//! semantic clause must never widen the result set.

use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use vecsync_query::{MockSemanticSearch, QueryRewriter, RewriterConfig};

#[tokio::test]
async fn test_rewrite_round_trip() {
    let rewriter = QueryRewriter::new(
        MockSemanticSearch::with_ids(vec![5, 9]),
        RewriterConfig::default(),
    );

    assert_eq!(
        rewriter.rewrite("deck:math vec:fractions").await.unwrap(),
        "deck:math (nid:5 OR nid:9)"
    );
    assert_eq!(
        rewriter.rewrite("   deck:math tag:hard  ").await.unwrap(),
        "deck:math tag:hard"
    );
}

#[tokio::test]
async fn test_zero_matches_match_nothing() {
    let search = MockSemanticSearch::with_ids(vec![]);
    let rewriter = QueryRewriter::new(search, RewriterConfig::default());

    let rewritten = rewriter.rewrite("deck:math vec:nothing like this").await.unwrap();
    assert_eq!(rewritten, "deck:math (nid:0)");
    assert_ne!(rewritten, "deck:math");
}

#[tokio::test]
async fn test_failed_search_matches_nothing() {
    let rewriter = QueryRewriter::new(MockSemanticSearch::failing(), RewriterConfig::default());

    assert!(rewriter.rewrite("deck:math vec:fractions").await.is_err());
    assert_eq!(
        rewriter.rewrite_or_match_nothing("deck:math vec:fractions").await,
        "deck:math (nid:0)"
    );
}

/// The search hook answers the semantic clause from the live index.
#[tokio::test]
async fn test_search_hook_against_engine() {
    let harness = TestHarness::new();
    harness.put(5, "adding fractions with unlike denominators", 10);
    harness.put(9, "mitochondria powerhouse", 20);
    harness.put(12, "the french revolution", 30);
    harness.put(14, "photosynthesis in plants", 40);
    let mut settings = harness.settings();
    settings.search_results_limit = 2;

    let (hooks, _) = vecsync_engine::HostHooks::on_init(
        &settings,
        harness.provider.clone(),
        harness.store.clone(),
        &vecsync_engine::NoOpProgress,
    )
    .await
    .unwrap();

    assert_eq!(
        hooks.on_search_query("deck:math vec:fractions").await,
        "deck:math (nid:5 OR nid:9)"
    );
    assert_eq!(hooks.on_search_query("deck:math").await, "deck:math");

    // Vector layer down: host search keeps working, the clause matches nothing
    harness.provider.fail_all();
    assert_eq!(
        hooks.on_search_query("deck:math vec:fractions").await,
        "deck:math (nid:0)"
    );
    assert_eq!(hooks.on_search_query("deck:math").await, "deck:math");
}
