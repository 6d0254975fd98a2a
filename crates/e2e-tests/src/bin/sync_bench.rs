use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use e2e_tests::TestHarness;
use vecsync_engine::{HostHooks, NoOpProgress, SyncEngine};
use vecsync_query::RewriterConfig;
use vecsync_types::{ModTime, NoteId, Record};

const WORDS: &[&str] = &[
    "fraction", "denominator", "cell", "mitochondria", "revolution", "treaty", "enzyme",
    "protein", "verb", "conjugation", "integral", "derivative", "photosynthesis", "orbit",
    "gravity", "sonnet", "metaphor", "kanji", "vocabulary", "anatomy", "muscle", "neuron",
    "capital", "river", "mountain", "equation", "matrix", "vector", "polynomial", "atom",
];

const SEARCH_QUERIES: usize = 50;

#[derive(Parser, Debug)]
#[command(name = "sync_bench", about = "vecsync sync and search benchmark harness")]
struct Args {
    #[arg(long, value_enum, default_value = "small")]
    tier: DatasetTier,
    #[arg(long, default_value_t = 3)]
    iterations: usize,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Write the JSON report here as well as to stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Serialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum DatasetTier {
    Small,
    Medium,
}

impl DatasetTier {
    fn record_count(&self) -> usize {
        match self {
            DatasetTier::Small => 500,
            DatasetTier::Medium => 5_000,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct StepMetrics {
    p50_ms: f64,
    p90_ms: f64,
    p99_ms: f64,
    samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    records_per_sec: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BenchmarkOutput {
    tier: DatasetTier,
    records: usize,
    batch_size: usize,
    iterations: usize,
    steps: BTreeMap<String, StepMetrics>,
}

#[derive(Default)]
struct SampleCollector {
    durations: BTreeMap<String, Vec<f64>>,
    records: BTreeMap<String, usize>,
}

impl SampleCollector {
    fn push(&mut self, step: &str, duration_ms: f64, records: usize) {
        self.durations
            .entry(step.to_string())
            .or_default()
            .push(duration_ms);
        *self.records.entry(step.to_string()).or_default() += records;
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    let count = args.tier.record_count();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut collector = SampleCollector::default();

    for _ in 0..args.iterations {
        run_iteration(&args, count, &mut rng, &mut collector).await?;
    }

    let output = BenchmarkOutput {
        tier: args.tier,
        records: count,
        batch_size: args.batch_size,
        iterations: args.iterations,
        steps: build_metrics(&collector),
    };
    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{}", render_table(&output));
    println!("\n{}", json);
    if let Some(path) = &args.out {
        fs::write(path, &json).map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    }
    Ok(())
}

async fn run_iteration(
    args: &Args,
    count: usize,
    rng: &mut StdRng,
    collector: &mut SampleCollector,
) -> Result<(), String> {
    let harness = TestHarness::new();
    harness.put_records(&synthetic_records(rng, count, 1, 1));
    let config = harness.config().with_batch_size(args.batch_size);

    let started = Instant::now();
    let engine = SyncEngine::open(config, harness.provider.clone(), harness.store.clone())
        .map_err(|e| e.to_string())?;
    let outcome = engine
        .reconcile(&NoOpProgress)
        .await
        .map_err(|e| e.to_string())?;
    collector.push("full_sync", elapsed_ms(started), outcome.stats.indexed);

    let started = Instant::now();
    engine
        .reconcile(&NoOpProgress)
        .await
        .map_err(|e| e.to_string())?;
    collector.push("noop_reconcile", elapsed_ms(started), 0);

    // Touch a tenth of the records
    let touched = (count / 10).max(1);
    let base_time = count as ModTime + 1;
    for i in 0..touched {
        let id = rng.random_range(1..=count as NoteId);
        let record = Record::new(id, vec![sentence(rng)], base_time + i as ModTime);
        harness.store.put_record(&record).map_err(|e| e.to_string())?;
    }
    let started = Instant::now();
    let outcome = engine
        .reconcile(&NoOpProgress)
        .await
        .map_err(|e| e.to_string())?;
    collector.push("incremental_sync", elapsed_ms(started), outcome.stats.indexed);

    for _ in 0..SEARCH_QUERIES {
        let query = sentence(rng);
        let started = Instant::now();
        engine.search(&query, 20).await.map_err(|e| e.to_string())?;
        collector.push("search_k20", elapsed_ms(started), 0);
    }

    let hooks = HostHooks::new(std::sync::Arc::new(engine), RewriterConfig::default());
    for _ in 0..SEARCH_QUERIES {
        let query = format!("deck:bench vec:{}", sentence(rng));
        let started = Instant::now();
        hooks.on_search_query(&query).await;
        collector.push("rewrite", elapsed_ms(started), 0);
    }
    hooks.on_shutdown();
    Ok(())
}

fn synthetic_records(rng: &mut StdRng, count: usize, first_id: NoteId, first_time: ModTime) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(
                first_id + i as NoteId,
                vec![sentence(rng), sentence(rng)],
                first_time + i as ModTime,
            )
        })
        .collect()
}

fn sentence(rng: &mut StdRng) -> String {
    let len = rng.random_range(3..8);
    (0..len)
        .map(|_| WORDS[rng.random_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn build_metrics(collector: &SampleCollector) -> BTreeMap<String, StepMetrics> {
    let mut steps = BTreeMap::new();
    for (step, durations) in &collector.durations {
        let mut sorted = durations.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let total_ms: f64 = sorted.iter().sum();
        let records = collector.records.get(step).copied().unwrap_or(0);
        let records_per_sec = (records > 0 && total_ms > 0.0)
            .then(|| records as f64 / (total_ms / 1000.0));

        steps.insert(
            step.clone(),
            StepMetrics {
                p50_ms: percentile(&sorted, 50.0),
                p90_ms: percentile(&sorted, 90.0),
                p99_ms: percentile(&sorted, 99.0),
                samples: sorted.len(),
                records_per_sec,
            },
        );
    }
    steps
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let rank = (percentile / 100.0) * (values.len() as f64 - 1.0);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        values[low]
    } else {
        let weight = rank - low as f64;
        values[low] + (values[high] - values[low]) * weight
    }
}

fn render_table(output: &BenchmarkOutput) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "Benchmark Results (records={}, batch_size={}, iterations={})",
        output.records, output.batch_size, output.iterations
    ));
    lines.push("step\tp50_ms\tp90_ms\tp99_ms\trecords_per_sec".to_string());
    for (step, metrics) in &output.steps {
        let throughput = metrics
            .records_per_sec
            .map(|r| format!("{:.1}", r))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{}\t{:.2}\t{:.2}\t{:.2}\t{}",
            step, metrics.p50_ms, metrics.p90_ms, metrics.p99_ms, throughput
        ));
    }
    lines.join("\n")
}
