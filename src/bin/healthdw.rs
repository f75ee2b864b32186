use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};

use healthdw::source::export::ExportSource;
use healthdw::storage::repository;

#[derive(Parser)]
#[command(name = "healthdw", about = "Personal health data warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.healthdw/healthdw.db)
    #[arg(long)]
    db: Option<String>,

    /// Directory for summary files (default: ~/.healthdw)
    #[arg(long)]
    data_dir: Option<String>,

    /// Health export file to sync from (default: config export_path)
    #[arg(long)]
    export: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl healthdw::SyncProgress for StderrProgress {
    fn on_domain_start(&self, domain: healthdw::Domain) {
        eprintln!("Syncing {}...", domain.key());
    }

    fn on_category_fetched(&self, _domain: healthdw::Domain, category_key: &str, records: usize) {
        eprintln!("  {category_key}: {records} changed records");
    }

    fn on_summaries_written(&self, _domain: healthdw::Domain, days: usize) {
        eprintln!("  Wrote {days} daily summaries");
    }

    fn on_domain_complete(&self, report: &healthdw::SyncReport) {
        eprintln!(
            "  Done: {} merged, {} deleted",
            report.records_merged, report.records_deleted
        );
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sync health data from the export into the warehouse
    Sync {
        /// Domain to sync: body_mass, sleep, activity, workout, or all
        #[arg(default_value = "all")]
        domain: String,
        /// Fetch window in days when no anchor exists
        #[arg(long, default_value = "30")]
        days: u32,
        /// Ignore stored anchors and refetch the whole window
        #[arg(long)]
        full: bool,
    },
    /// Clear a domain's data and sync it from scratch
    Resync {
        /// Domain to resync: body_mass, sleep, activity, or workout
        domain: String,
        /// Fetch window in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Show warehouse statistics
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Log and inspect food entries
    Food {
        #[command(subcommand)]
        action: FoodAction,
    },
    /// Run an LLM assessment
    Analyze {
        #[command(subcommand)]
        target: AnalyzeTarget,
    },
    /// Inspect daily summaries
    Summary {
        #[command(subcommand)]
        action: SummaryAction,
    },
    /// Manage strength-training day records
    Workout {
        #[command(subcommand)]
        action: WorkoutAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum FoodAction {
    /// Log a food entry
    Add {
        #[arg(long)]
        name: String,
        /// Protein in grams
        #[arg(long)]
        protein: f64,
        /// Fat in grams
        #[arg(long)]
        fat: f64,
        /// Carbohydrates in grams
        #[arg(long)]
        carbs: f64,
        /// Energy in kcal
        #[arg(long)]
        calories: f64,
        /// When it was eaten, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List today's food entries
    Today {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AnalyzeTarget {
    /// Assess today's nutrition balance
    Nutrition,
    /// Assess recent sleep quality
    Sleep {
        /// Nights of sleep summaries to include
        #[arg(long, default_value = "7")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum SummaryAction {
    /// Print one day's summary
    Show {
        /// Domain: body_mass, sleep, activity, or workout
        domain: String,
        /// Day, YYYY-MM-DD
        date: String,
    },
    /// List days with a summary
    List {
        /// Domain: body_mass, sleep, activity, or workout
        domain: String,
    },
}

#[derive(Subcommand)]
enum WorkoutAction {
    /// Print one day's workout record
    Show {
        /// Day, YYYY-MM-DD
        date: String,
    },
    /// List a month's workout records
    Month {
        /// Month, YYYY-MM
        month: String,
        /// Print the compressed one-line-per-day form
        #[arg(long)]
        compressed: bool,
    },
    /// Import a workout day record from a JSON file
    Import {
        /// Path to a workout record JSON file
        file: String,
    },
    /// Delete one day's workout record
    Delete {
        /// Day, YYYY-MM-DD
        date: String,
    },
}

fn parse_domain(s: &str) -> anyhow::Result<healthdw::Domain> {
    healthdw::Domain::from_key(s)
        .ok_or_else(|| anyhow::anyhow!("unknown domain {s:?}; expected body_mass, sleep, activity, or workout"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => healthdw::Database::open_at(path).await?,
        None => healthdw::Database::open().await?,
    };
    let summaries = match &cli.data_dir {
        Some(dir) => healthdw::SummaryStore::new(dir),
        None => healthdw::SummaryStore::open_default()?,
    };

    match cli.command {
        Commands::Sync { domain, days, full } => {
            let source = export_source(&cli.export, &db).await?;
            let dw = healthdw::HealthDW::new(db, source, summaries);
            let options = healthdw::SyncOptions {
                lookback_days: days,
                full,
            };
            if domain == "all" {
                let reports = dw.sync_all(&options, &StderrProgress).await?;
                print_reports(&reports);
            } else {
                let report = dw
                    .sync_domain(parse_domain(&domain)?, &options, &StderrProgress)
                    .await?;
                print_reports(std::slice::from_ref(&report));
            }
        }
        Commands::Resync { domain, days } => {
            let source = export_source(&cli.export, &db).await?;
            let dw = healthdw::HealthDW::new(db, source, summaries);
            let options = healthdw::SyncOptions {
                lookback_days: days,
                full: true,
            };
            let report = dw
                .resync_domain(parse_domain(&domain)?, &options, &StderrProgress)
                .await?;
            print_reports(std::slice::from_ref(&report));
        }
        Commands::Status => {
            print_status(&db).await?;
        }
        Commands::Config { action } => {
            handle_config(&db, action).await?;
        }
        Commands::Food { action } => {
            handle_food(&db, action).await?;
        }
        Commands::Analyze { target } => {
            handle_analyze(&db, &summaries, target).await?;
        }
        Commands::Summary { action } => {
            handle_summary(&summaries, action)?;
        }
        Commands::Workout { action } => {
            let log = healthdw::summary::workout_log::WorkoutLog::new(summaries.root());
            handle_workout(&log, action)?;
        }
    }

    Ok(())
}

/// Resolve the export file: flag, then config, then the default path
/// next to the database.
async fn export_source(
    flag: &Option<String>,
    db: &healthdw::Database,
) -> anyhow::Result<ExportSource> {
    if let Some(path) = flag {
        return Ok(ExportSource::new(path));
    }
    let configured = db
        .reader()
        .call(|conn| repository::get_config(conn, "export_path"))
        .await?;
    if let Some(path) = configured {
        return Ok(ExportSource::new(path));
    }
    Ok(ExportSource::new(
        healthdw::storage::default_data_dir()?.join("export.json"),
    ))
}

fn print_reports(reports: &[healthdw::SyncReport]) {
    for report in reports {
        let status = match report.status {
            healthdw::SyncStatus::Success => "ok",
            healthdw::SyncStatus::PartialFailure => "partial",
            healthdw::SyncStatus::Failed => "FAILED",
        };
        println!(
            "{:<10} {status}: {} merged, {} deleted, {} days written{}",
            report.domain.key(),
            report.records_merged,
            report.records_deleted,
            report.days_written,
            report
                .error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default(),
        );
    }
}

async fn print_status(db: &healthdw::Database) -> anyhow::Result<()> {
    let (counts, anchors, food, last_sync) = db
        .reader()
        .call(|conn| {
            let mut counts = Vec::new();
            for domain in healthdw::Domain::ALL {
                counts.push((domain, repository::count_domain_records(conn, domain)?));
            }
            let anchors = repository::count_anchors(conn)?;
            let food = repository::count_food_entries(conn)?;
            let last_sync = repository::last_completed_sync(conn)?;
            Ok::<_, rusqlite::Error>((counts, anchors, food, last_sync))
        })
        .await?;

    println!("Warehouse Status");
    for (domain, count) in counts {
        println!("  {:<10} {count} records", domain.key());
    }
    println!("  Anchors:   {anchors}");
    println!("  Food:      {food} entries");
    println!(
        "  Last sync: {}",
        last_sync.unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_config(db: &healthdw::Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let val: Option<String> = db
                .reader()
                .call({
                    let key = key.clone();
                    move |conn| repository::get_config(conn, &key)
                })
                .await?;
            match val {
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            db.writer()
                .call(move |conn| {
                    repository::set_config(conn, &key, &value)?;
                    Ok::<(), rusqlite::Error>(())
                })
                .await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items: Vec<(String, String)> = db
                .reader()
                .call(|conn| repository::list_config(conn))
                .await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_food(db: &healthdw::Database, action: FoodAction) -> anyhow::Result<()> {
    match action {
        FoodAction::Add {
            name,
            protein,
            fat,
            carbs,
            calories,
            at,
        } => {
            let consumed_at = match at {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| anyhow::anyhow!("invalid --at timestamp: {e}"))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let entry = healthdw::NewFoodEntry {
                food_name: name,
                protein,
                fat,
                carbs,
                calories,
                consumed_at,
            };
            entry.validate().map_err(|e| anyhow::anyhow!(e))?;
            let saved = db
                .writer()
                .call(move |conn| repository::insert_food_entry(conn, &entry))
                .await?;
            println!(
                "Logged {} ({}kcal, P{}g F{}g C{}g)",
                saved.food_name, saved.calories, saved.protein, saved.fat, saved.carbs
            );
        }
        FoodAction::Today { json } => {
            let entries = healthdw::analysis::today_food_entries(db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No food logged today.");
            } else {
                let mut calories = 0.0;
                for entry in &entries {
                    println!(
                        "{}  {} ({}kcal)",
                        entry.consumed_at.with_timezone(&chrono::Local).format("%H:%M"),
                        entry.food_name,
                        entry.calories
                    );
                    calories += entry.calories;
                }
                println!("Total: {calories}kcal over {} entries", entries.len());
            }
        }
    }
    Ok(())
}

async fn handle_analyze(
    db: &healthdw::Database,
    summaries: &healthdw::SummaryStore,
    target: AnalyzeTarget,
) -> anyhow::Result<()> {
    let agent = healthdw::analysis::create_agent(db).await?;
    let text = match target {
        AnalyzeTarget::Nutrition => healthdw::analysis::analyze_nutrition(db, &agent).await?,
        AnalyzeTarget::Sleep { days } => {
            let data = recent_sleep_inputs(db, summaries, days).await?;
            healthdw::analysis::analyze_sleep(&data, &agent).await?
        }
    };
    println!("{text}");
    Ok(())
}

/// Build sleep analysis input from the most recent summary files.
async fn recent_sleep_inputs(
    db: &healthdw::Database,
    summaries: &healthdw::SummaryStore,
    days: u32,
) -> anyhow::Result<Vec<healthdw::analysis::SleepAnalysisInput>> {
    let cutoff = db
        .reader()
        .call(|conn| repository::get_cutoff_hour(conn))
        .await?;
    let today = healthdw::date_util::today_logical(cutoff, &chrono::Local);

    let mut data = Vec::new();
    for offset in (0..days as i64).rev() {
        let day = today - Duration::days(offset);
        let Some(healthdw::aggregate::DaySummary::Sleep(s)) =
            summaries.load(healthdw::Domain::Sleep, day)?
        else {
            continue;
        };
        let efficiency_pct = if s.in_bed_hours > 0.0 {
            Some(s.total_sleep_hours / s.in_bed_hours * 100.0)
        } else {
            None
        };
        data.push(healthdw::analysis::SleepAnalysisInput {
            date: s.date,
            duration_hours: s.total_sleep_hours,
            fall_asleep_minutes: None,
            efficiency_pct,
        });
    }
    Ok(data)
}

fn handle_workout(
    log: &healthdw::summary::workout_log::WorkoutLog,
    action: WorkoutAction,
) -> anyhow::Result<()> {
    use healthdw::summary::workout_log;

    match action {
        WorkoutAction::Show { date } => {
            let day = healthdw::date_util::parse_date_key(&date)
                .ok_or_else(|| anyhow::anyhow!("invalid date {date:?}; expected YYYY-MM-DD"))?;
            match log.load(day)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("No workout record for {date}."),
            }
        }
        WorkoutAction::Month { month, compressed } => {
            let (year, month_num) = month
                .split_once('-')
                .and_then(|(y, m)| Some((y.parse().ok()?, m.parse().ok()?)))
                .filter(|&(_, m)| (1..=12).contains(&m))
                .ok_or_else(|| anyhow::anyhow!("invalid month {month:?}; expected YYYY-MM"))?;
            let records = log.load_month(year, month_num)?;
            if records.is_empty() {
                println!("No workout records in {month}.");
            } else if compressed {
                println!("{}", workout_log::compressed_for_llm(&records));
            } else {
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }
        WorkoutAction::Import { file } => {
            let body = std::fs::read_to_string(&file)?;
            let record: workout_log::WorkoutDayRecord = serde_json::from_str(&body)?;
            log.save(&record)?;
            println!(
                "Saved workout record for {} ({} exercises)",
                record.date,
                record.exercises.len()
            );
        }
        WorkoutAction::Delete { date } => {
            let day = healthdw::date_util::parse_date_key(&date)
                .ok_or_else(|| anyhow::anyhow!("invalid date {date:?}; expected YYYY-MM-DD"))?;
            if log.delete(day)? {
                println!("Deleted workout record for {date}.");
            } else {
                println!("No workout record for {date}.");
            }
        }
    }
    Ok(())
}

fn handle_summary(summaries: &healthdw::SummaryStore, action: SummaryAction) -> anyhow::Result<()> {
    match action {
        SummaryAction::Show { domain, date } => {
            let domain = parse_domain(&domain)?;
            let day = healthdw::date_util::parse_date_key(&date)
                .ok_or_else(|| anyhow::anyhow!("invalid date {date:?}; expected YYYY-MM-DD"))?;
            match summaries.load(domain, day)? {
                Some(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary)?)
                }
                None => println!("No {} summary for {date}.", domain.key()),
            }
        }
        SummaryAction::List { domain } => {
            let domain = parse_domain(&domain)?;
            let days = summaries.list_days(domain)?;
            if days.is_empty() {
                println!("No {} summaries.", domain.key());
            } else {
                for day in days {
                    println!("{}", healthdw::date_util::date_key(day));
                }
            }
        }
    }
    Ok(())
}
