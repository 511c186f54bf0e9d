mod collect;
mod config;
mod extract;
mod record;
mod session;
mod store;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, warn};

use config::{DealType, RunConfig, RunMode};
use record::Price;
use session::Session;
use store::BatchWriter;

#[derive(Parser)]
#[command(name = "cian_harvester", about = "Resilient harvester for cian.ru office listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// City to work on (moscow, spb, ekaterinburg, chelyabinsk)
    #[arg(short, long, default_value = "ekaterinburg")]
    city: String,
    /// Deal side of the listings
    #[arg(short, long, value_enum, default_value_t = DealType::Rent)]
    deal: DealType,
    /// Directory holding the CSV stores
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Args)]
struct HarvestArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// test walks a capped number of result pages, full walks until exhausted
    #[arg(short, long, value_enum, default_value_t = RunMode::Test)]
    mode: RunMode,
    /// Result-page cap for test mode
    #[arg(short = 'n', long, default_value = "2")]
    pages: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect links, harvest details and phones, append to the store
    Run(HarvestArgs),
    /// Link discovery only: print what a run would visit
    Collect(HarvestArgs),
    /// Store summary
    Stats(TargetArgs),
    /// Filter the store the way the downstream bot does
    Query {
        #[command(flatten)]
        target: TargetArgs,
        /// Minimum area, m²
        #[arg(long)]
        min_area: Option<f64>,
        /// Maximum area, m²
        #[arg(long)]
        max_area: Option<f64>,
        /// Minimum price; a range row must fit entirely
        #[arg(long)]
        min_price: Option<i64>,
        /// Maximum price; a range row must fit entirely
        #[arg(long)]
        max_price: Option<i64>,
        /// Exact floor match
        #[arg(long)]
        floor: Option<i32>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run_harvest(args).await,
        Commands::Collect(args) => run_collect(args).await,
        Commands::Stats(target) => show_stats(&target),
        Commands::Query { target, min_area, max_area, min_price, max_price, floor, limit } => {
            let filter = store::Filter { min_area, max_area, min_price, max_price, floor };
            run_query(&target, filter, limit)
        }
    };

    // Single catch point for anything fatal: log the chain and exit cleanly.
    if let Err(e) = result {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

async fn run_harvest(args: HarvestArgs) -> Result<()> {
    let cfg = RunConfig::resolve(
        &args.target.city,
        args.target.deal,
        args.mode,
        args.pages,
        args.target.data_dir,
    )?;
    let store_path = cfg.store_path();

    let mut known = store::load_existing_links(&store_path)?;
    println!(
        "Store: {} ({} listings already saved)",
        store_path.display(),
        known.len()
    );

    let session = Session::launch()?;
    println!(
        "Collecting {} links for {} (mode: {})...",
        cfg.deal, cfg.region.name, args.mode
    );
    let links = collect::collect_links(&session, cfg.region.id, cfg.deal, cfg.page_cap).await;
    let todo: Vec<String> = links.iter().filter(|l| !known.contains(*l)).cloned().collect();
    println!("Found {} links, {} new", links.len(), todo.len());
    if todo.is_empty() {
        println!("Nothing new to harvest.");
        return Ok(());
    }

    let mut writer = BatchWriter::new(&store_path);
    let outcome = harvest_all(&session, cfg.deal, &todo, &mut writer, &mut known).await;
    // The tail batch is flushed even when the loop failed or was interrupted.
    let saved = writer.finish()?;
    let outcome = outcome?;

    println!(
        "Parsed {} listings ({} skipped), saved {} to {}",
        outcome.parsed,
        outcome.skipped,
        saved,
        store_path.display()
    );
    if outcome.interrupted {
        println!("Stopped early on interrupt.");
    }
    Ok(())
}

struct HarvestOutcome {
    parsed: usize,
    skipped: usize,
    interrupted: bool,
}

/// Visit each new listing in order, one at a time. Ctrl-C breaks the loop
/// between listings; everything parsed so far still reaches the store.
async fn harvest_all(
    session: &Session,
    deal: DealType,
    urls: &[String],
    writer: &mut BatchWriter,
    known: &mut HashSet<String>,
) -> Result<HarvestOutcome> {
    let pb = ProgressBar::new(urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut outcome = HarvestOutcome { parsed: 0, skipped: 0, interrupted: false };
    for url in urls {
        if known.contains(url) {
            pb.inc(1);
            continue;
        }
        let record = tokio::select! {
            record = extract::harvest(session, url, deal) => record,
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, stopping");
                outcome.interrupted = true;
                break;
            }
        };
        match record {
            Some(record) => {
                known.insert(record.url.clone());
                writer.push(record)?;
                outcome.parsed += 1;
            }
            None => outcome.skipped += 1,
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(outcome)
}

async fn run_collect(args: HarvestArgs) -> Result<()> {
    let cfg = RunConfig::resolve(
        &args.target.city,
        args.target.deal,
        args.mode,
        args.pages,
        args.target.data_dir,
    )?;
    let known = store::load_existing_links(&cfg.store_path())?;

    let session = Session::launch()?;
    let links = collect::collect_links(&session, cfg.region.id, cfg.deal, cfg.page_cap).await;

    let mut new = 0usize;
    for url in &links {
        let marker = if known.contains(url) { "known" } else { "new  " };
        if !known.contains(url) {
            new += 1;
        }
        println!("{}  {}", marker, url);
    }
    println!("\nFound {} links ({} new, {} known)", links.len(), new, links.len() - new);
    Ok(())
}

fn show_stats(target: &TargetArgs) -> Result<()> {
    let path = resolve_store_path(target)?;
    if !path.exists() {
        println!("No store at {}. Run 'run' first.", path.display());
        return Ok(());
    }
    let rows = store::read_all(&path)?;

    let with_price = rows.iter().filter(|r| r.price.is_some()).count();
    let ranged = rows
        .iter()
        .filter(|r| matches!(r.price, Some(Price::Range { .. })))
        .count();
    let with_area = rows.iter().filter(|r| r.area.is_some()).count();
    let with_phone = rows.iter().filter(|r| r.phone.is_some()).count();

    println!("Store:      {}", path.display());
    println!("Total:      {}", rows.len());
    println!("With price: {}", with_price);
    println!("  ranged:   {}", ranged);
    println!("With area:  {}", with_area);
    println!("With phone: {}", with_phone);
    Ok(())
}

fn run_query(target: &TargetArgs, filter: store::Filter, limit: usize) -> Result<()> {
    let path = resolve_store_path(target)?;
    if !path.exists() {
        println!("No store at {}. Run 'run' first.", path.display());
        return Ok(());
    }
    let rows = store::read_all(&path)?;
    let matched: Vec<_> = rows.iter().filter(|r| filter.matches(r)).take(limit).collect();
    if matched.is_empty() {
        println!("No listings match.");
        return Ok(());
    }

    // Compact, readable table
    println!(
        "{:>3} | {:<40} | {:>17} | {:>8} | {:>6} | {:<13}",
        "#", "Address", "Price", "Area", "Floor", "Phone"
    );
    println!("{}", "-".repeat(102));

    for (i, r) in matched.iter().enumerate() {
        let price = r.price.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let area = r.area.map(store::format_amount).unwrap_or_else(|| "-".into());
        let floor = match (r.floor, r.floor_total) {
            (Some(current), Some(total)) => format!("{}/{}", current, total),
            (Some(current), None) => current.to_string(),
            _ => "-".into(),
        };
        let phone = r.phone.as_deref().unwrap_or("-");
        println!(
            "{:>3} | {:<40} | {:>17} | {:>8} | {:>6} | {:<13}",
            i + 1,
            truncate(&r.address, 40),
            price,
            area,
            floor,
            phone
        );
    }

    println!("\n{} of {} listings | {}", matched.len(), rows.len(), path.display());
    Ok(())
}

fn resolve_store_path(target: &TargetArgs) -> Result<PathBuf> {
    let region = config::resolve_region(&target.city)?;
    Ok(config::store_path(&target.data_dir, region.key, target.deal))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
