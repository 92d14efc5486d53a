use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::Claude;
use reviewpulse_common::scoring::SourceWeights;
use reviewpulse_common::Config;
use reviewpulse_engine::agents::{
    AnalysisAgent, CompetitorAgent, PriorityAgent, RiskAgent, SentimentAgent,
};
use reviewpulse_engine::classify::{ClassifierStack, LlmClassifier, RuleClassifier};
use reviewpulse_engine::collect::{
    Collector, HackerNewsCollector, RedditCollector, WebSearchCollector,
};
use reviewpulse_engine::dedup::TokenOverlap;
use reviewpulse_engine::orchestrator::{Orchestrator, PipelineDeps, PipelineTuning};
use reviewpulse_engine::report::MarkdownReportWriter;
use reviewpulse_engine::worker::Worker;
use reviewpulse_store::{migrate, PgJobStore, PgTaskQueue};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Parser, Debug)]
#[command(name = "reviewpulse-engine", about = "ReviewPulse research worker")]
struct Args {
    /// Number of concurrent worker loops.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Queue poll interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reviewpulse=info".parse()?))
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    info!("ReviewPulse engine starting...");

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await?;
    migrate(&pool).await?;

    let store = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(PgTaskQueue::new(pool));

    let call_timeout = Duration::from_secs(config.stage_timeout_secs);
    let mut collectors: Vec<Arc<dyn Collector>> = vec![
        Arc::new(RedditCollector::new(call_timeout)),
        Arc::new(HackerNewsCollector::new(call_timeout)),
    ];
    if config.serper_api_key.is_empty() {
        tracing::warn!("SERPER_API_KEY not set, skipping web search collection");
    } else {
        collectors.push(Arc::new(WebSearchCollector::new(
            &config.serper_api_key,
            call_timeout,
        )));
    }

    let ai = Claude::new(&config.anthropic_api_key, DEFAULT_MODEL);
    let weights = SourceWeights::default();
    let classifier = ClassifierStack::new(
        Some(Arc::new(LlmClassifier::new(ai.clone(), weights.clone()))),
        Arc::new(RuleClassifier::new(weights)),
    );
    let agents: Vec<Arc<dyn AnalysisAgent>> = vec![
        Arc::new(SentimentAgent::new(Some(ai.clone()))),
        Arc::new(PriorityAgent::new(Some(ai.clone()))),
        Arc::new(CompetitorAgent::new(Some(ai.clone()))),
        Arc::new(RiskAgent::new(Some(ai))),
    ];

    let orchestrator = Arc::new(Orchestrator::new(
        PipelineDeps {
            store,
            collectors,
            classifier,
            agents,
            similarity: Arc::new(TokenOverlap),
            assembler: Arc::new(MarkdownReportWriter::default_location()),
        },
        PipelineTuning {
            call_timeout,
            collect_limit: 20,
            dedup_threshold: config.dedup_threshold,
            default_monthly_price: config.default_monthly_price,
        },
    ));

    info!(workers = args.workers, "Spawning worker pool");
    let mut workers = tokio::task::JoinSet::new();
    for i in 0..args.workers.max(1) {
        let worker = Worker::new(
            format!("worker-{i}"),
            queue.clone(),
            orchestrator.clone(),
            Duration::from_millis(args.poll_ms),
        );
        workers.spawn(async move { worker.run().await });
    }
    while let Some(joined) = workers.join_next().await {
        joined?;
    }
    Ok(())
}
