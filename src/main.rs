mod config;
mod db;
mod fetch;
mod ingest;
mod normalize;
mod parser;
mod validate;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::ingest::WriteMode;

#[derive(Parser)]
#[command(name = "welfare_ingest", about = "Welfare policy crawler, importer and validator")]
struct Cli {
    /// Settings file (default: welfare.toml if present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch seed pages, extract policies and store them
    Crawl {
        /// Only crawl seeds of this region (e.g. "서울")
        #[arg(short, long)]
        region: Option<String>,
        /// Max seed pages to fetch
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Clear the table and reload it with this crawl
        #[arg(long)]
        replace: bool,
        /// Crawl hosts concurrently (one request at a time per host)
        #[arg(long)]
        parallel: bool,
        /// Also write the extracted drafts to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Load policy drafts from JSON files (full reload by default)
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Upsert by url instead of replacing the table
        #[arg(long)]
        merge: bool,
    },
    /// Run data-quality checks and write a JSON report
    Validate {
        /// Report path (default: validation_report.json next to the database)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List stored policies
    Query {
        #[arg(short, long)]
        region: Option<String>,
        /// Policies whose age range covers this age
        #[arg(short, long)]
        age: Option<i64>,
        /// Match title, conditions or benefits
        #[arg(short, long)]
        keyword: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show store counts
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;

    let result = match cli.command {
        Commands::Crawl { region, limit, replace, parallel, json } => {
            let mut seeds = settings.seed_list(region.as_deref());
            if let Some(n) = limit {
                seeds.truncate(n);
            }
            if seeds.is_empty() {
                println!("No seed URLs configured{}.", region.map(|r| format!(" for {}", r)).unwrap_or_default());
                return Ok(());
            }

            let mode = if replace { WriteMode::Replace } else { WriteMode::Merge };
            println!("Crawling {} pages ({:?})...", seeds.len(), mode);
            let outcome = ingest::crawl(&conn, &seeds, &settings.client(), mode, parallel)?;
            if let Some(path) = json {
                ingest::export_drafts(&path, &outcome.drafts)?;
            }
            outcome.summary.print();
            Ok(())
        }
        Commands::Import { files, merge } => {
            let mode = if merge { WriteMode::Merge } else { WriteMode::Replace };
            println!("Importing {} files ({:?})...", files.len(), mode);
            let summary = ingest::import(&conn, files.as_slice(), mode)?;
            summary.print();
            Ok(())
        }
        Commands::Validate { out } => {
            let source = settings.db_path.display().to_string();
            let report = validate::validate(&conn, &source)?;
            report.print();
            let path = out.unwrap_or_else(|| validate::default_report_path(&settings.db_path));
            validate::write_report(&report, &path)?;
            println!("\nReport: {}", path.display());
            Ok(())
        }
        Commands::Query { region, age, keyword, limit } => {
            let rows = match (region, age, keyword) {
                (Some(r), _, _) => db::fetch_by_region(&conn, &r)?,
                (None, Some(a), _) => db::fetch_by_age(&conn, a)?,
                (None, None, Some(k)) => db::search(&conn, &k)?,
                (None, None, None) => db::fetch_all(&conn)?,
            };
            if rows.is_empty() {
                println!("No policies found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<30} | {:<12} | {:<9} | {:<23}",
                "#", "Title", "Region", "Age", "Period"
            );
            println!("{}", "-".repeat(90));

            for (i, p) in rows.iter().take(limit).enumerate() {
                let r = &p.record;
                let age = if r.age_min < 0 {
                    "-".to_string()
                } else {
                    format!("{}-{}", r.age_min, r.age_max)
                };
                println!(
                    "{:>3} | {:<30} | {:<12} | {:<9} | {:<23}",
                    i + 1,
                    truncate(&r.title, 30),
                    truncate(&r.region, 12),
                    age,
                    truncate(&r.application_period, 23)
                );
            }

            println!("\n{} of {} policies shown", rows.len().min(limit), rows.len());
            Ok(())
        }
        Commands::Stats => {
            println!("Database: {}", settings.db_path.display());
            println!("Total:    {}", db::count(&conn)?);
            println!("Regions:  {}", db::distinct_regions(&conn)?.len());
            for (region, n) in db::region_counts(&conn)? {
                println!("  {:<20} {:>5}", region, n);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
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
