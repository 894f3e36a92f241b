use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::error;
use tracing_subscriber::EnvFilter;
use universal_scraper::{
    fetcher::BrowserFetcher, App, Extractor, ModelId, Pipeline, ScraperConfig,
};

/// Scrape pages in a real browser and extract the named fields with an LLM.
#[derive(Parser, Debug)]
#[command(name = "universal-scraper", version, about)]
struct Cli {
    /// URLs to scrape; each argument may hold several whitespace-separated URLs.
    #[arg(required = true)]
    urls: Vec<String>,

    /// A field to extract from every page (repeatable).
    #[arg(short, long = "field", required = true)]
    fields: Vec<String>,

    /// The model to extract with (gemini-1.5-flash or gpt-4o-mini).
    #[arg(short, long)]
    model: Option<String>,

    /// Configuration file.
    #[arg(short, long, default_value = "scraper.toml")]
    config: PathBuf,

    /// Where to write scraped_data.json and scraped_data.csv (defaults to the run folder).
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Show the browser window.
    #[arg(long)]
    headed: bool,
}

/// The main entry point of the application.
///
/// Loads the configuration, resolves the model and credential before any browser or
/// network activity, runs the batch, prints one table per page, and writes the
/// combined exports.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = ScraperConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.headed {
        config.browser.headless = false;
    }

    let model_name = cli.model.unwrap_or_else(|| config.default_model.clone());
    let model: ModelId = model_name.parse()?;

    // Configuration errors surface here, before any network activity.
    let extractor = Extractor::from_config(&model_name, &config.llm)?;
    let fetcher = BrowserFetcher::new(config.browser.clone());
    let mut pipeline = Pipeline::new(Box::new(fetcher), extractor, &config.output_dir);

    let mut app = App::new();
    if let Err(message) = app.submit(&cli.urls.join(" "), &cli.fields, model) {
        bail!(message);
    }

    let start_time = Instant::now();
    app.run(&mut pipeline).await?;
    let elapsed = start_time.elapsed();

    let Some(output) = app.results() else {
        bail!("scraping finished without results");
    };

    println!("\n=== Scraping Results ===");
    for table in app.render_tables() {
        println!("\n{}", table);
    }
    for skipped in &output.skipped {
        println!("\nURL {} skipped ({}): {}", skipped.index, skipped.url, skipped.reason);
    }

    let usage = output.total_usage();
    println!("\nProcessing time: {:.2?}", elapsed);
    println!("Pages extracted: {} of {}", output.results.len(), output.results.len() + output.skipped.len());
    println!("Tokens: {} in / {} out", usage.input_tokens, usage.output_tokens);

    let export_dir = cli.export_dir.unwrap_or_else(|| output.output_dir.clone());
    match app.write_exports(&export_dir) {
        Some(Ok((json_path, csv_path))) => {
            println!("Downloads: {} and {}", json_path.display(), csv_path.display());
        }
        Some(Err(e)) => error!("Failed to write combined exports: {}", e),
        None => {}
    }

    println!("Scraping completed. Results saved in {}", output.output_dir.display());
    Ok(())
}
