use std::sync::Arc;

use ai_client::{Anthropic, CompletionAgent};
use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradescope_common::{Config, Tunables};
use tradescope_pipeline::acquire::ContentAcquisitionEngine;
use tradescope_pipeline::analyzer::Analyzer;
use tradescope_pipeline::cache::{MemoryStore, ResultStore};
use tradescope_pipeline::collaborators::{
    ComplianceLookup, HttpComplianceClient, HttpMarketClient, MarketIntel, NoopComplianceLookup,
    NoopMarketIntel,
};
use tradescope_pipeline::consolidate::{variants_from_entities, ProductConsolidationEngine};
use tradescope_pipeline::enrich::EnrichmentEngine;
use tradescope_pipeline::extract::EntityExtractionEngine;
use tradescope_pipeline::pool::BrowserPool;
use tradescope_pipeline::validate::ValidationEngine;

#[derive(Parser)]
#[command(
    name = "tradescope",
    about = "Extract a confidence-scored business and product catalog from a website"
)]
struct Args {
    /// Bare domain or full URL to analyze
    url: String,

    /// Skip the result cache
    #[arg(long)]
    no_cache: bool,

    /// Also consolidate extracted products into variant groups
    #[arg(long)]
    consolidate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tradescope=info".parse()?))
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let tunables = Arc::new(Tunables::default());

    info!("Tradescope starting...");

    let pool = config.browserless_url.as_ref().map(|base_url| {
        Arc::new(BrowserPool::new(
            base_url,
            config.browserless_token.as_deref(),
            tunables.pool_size,
            tunables.pool_idle_ttl,
            tunables.pool_sweep_interval,
        ))
    });
    let fetcher = Arc::new(ContentAcquisitionEngine::new(pool, Arc::clone(&tunables))?);

    let extraction_agent: Option<Arc<dyn CompletionAgent>> =
        config.anthropic_api_key.as_ref().map(|key| {
            Arc::new(Anthropic::new(key, &config.extraction_model).with_temperature(0.1))
                as Arc<dyn CompletionAgent>
        });
    // Validation goes through its own collaborator so the cross-check stays
    // independent of the extraction call.
    let validation_agent: Option<Arc<dyn CompletionAgent>> =
        config.anthropic_api_key.as_ref().map(|key| {
            Arc::new(Anthropic::new(key, &config.validation_model).with_temperature(0.2))
                as Arc<dyn CompletionAgent>
        });

    let extraction = EntityExtractionEngine::new(extraction_agent, Arc::clone(&tunables));
    let validation = ValidationEngine::new(validation_agent, Arc::clone(&tunables));

    let enrichment = if config.compliance_api_url.is_some() || config.market_api_url.is_some() {
        let compliance: Arc<dyn ComplianceLookup> = match &config.compliance_api_url {
            Some(base_url) => Arc::new(HttpComplianceClient::new(
                base_url,
                config.compliance_api_key.as_deref(),
            )?),
            None => Arc::new(NoopComplianceLookup),
        };
        let market: Arc<dyn MarketIntel> = match &config.market_api_url {
            Some(base_url) => {
                Arc::new(HttpMarketClient::new(base_url, config.market_api_key.as_deref())?)
            }
            None => Arc::new(NoopMarketIntel),
        };
        Some(EnrichmentEngine::new(compliance, market, Arc::clone(&tunables)))
    } else {
        None
    };

    let store = (!args.no_cache)
        .then(|| Arc::new(MemoryStore::new(tunables.cache_ttl)) as Arc<dyn ResultStore>);

    let analyzer = Analyzer::new(
        fetcher,
        extraction,
        validation,
        enrichment,
        store,
        Arc::clone(&tunables),
    );

    let result = analyzer.analyze(&args.url).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if args.consolidate {
        let engine = ProductConsolidationEngine::new(tunables);
        let groups = engine.consolidate(variants_from_entities(&result.entities));
        println!("{}", serde_json::to_string_pretty(&groups)?);
    }

    Ok(())
}
