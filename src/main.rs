//! Tally CLI
//!
//! Command-line interface for running report definitions:
//! - Run a TOML report definition against a SQLite database or CSV directory
//! - List the registered computation fields
//! - Preview the date windows of a time-series pattern
//! - Generate a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally::config::{generate_default_config, Config, LoggingConfig, SourceConfig, SourceKind};
use tally::report::{time_series_windows, ColumnData, ReportDefinition, TimeSeriesPattern};
use tally::source::csv_import::parse_datetime;
use tally::{CsvLoader, DataSource, FieldRegistry, ReportRow, Schema, SqliteSource, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tally")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grouped, time-series and cross-tab reports over relational data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/tally/config.toml, ./tally.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a report definition
    Run {
        /// Path to the report definition (TOML)
        definition: PathBuf,
        /// Data source path, overriding the config
        #[arg(short, long)]
        source: Option<String>,
        /// Schema file, overriding the config
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Report slug used in JSON output
        #[arg(long)]
        slug: Option<String>,
    },

    /// List registered computation fields
    Fields,

    /// Show the date windows a time-series pattern produces
    Windows {
        /// Pattern (daily, weekly, bi-weekly, monthly, quarterly, semiannually, annually)
        pattern: String,
        /// Start date (inclusive)
        start: String,
        /// End date (exclusive)
        end: String,
    },

    /// Generate default config file
    InitConfig {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            definition,
            source,
            schema,
            slug,
        } => {
            let definition = ReportDefinition::load(&definition)?;

            let mut source_config = config.source.clone();
            if let Some(path) = source {
                source_config.path = path;
            }
            let schema = match (schema, definition.schema()) {
                (Some(path), _) => Schema::load(&path)?,
                (None, Some(schema)) => schema,
                (None, None) => match &source_config.schema {
                    Some(path) => Schema::load(Path::new(path))
                        .with_context(|| format!("failed to load schema {}", path))?,
                    None => bail!("no schema: declare [[entities]] in the definition or set source.schema"),
                },
            };

            let source = open_source(&source_config, schema)?;
            let generator = definition.build(source, &config.report)?;
            let data = generator.get_report_data()?;
            tracing::info!("Report {} produced {} rows", generator.name(), data.len());

            match cli.format.as_str() {
                "json" => {
                    let response = generator.get_full_response(
                        Some(data),
                        slug.as_deref(),
                        definition.charts.clone(),
                        Some(definition.title()),
                    )?;
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                "csv" => print_csv(&generator.get_columns_data(), &data)?,
                _ => print_table(&generator.get_columns_data(), &data),
            }
        }

        Commands::Fields => {
            let registry = FieldRegistry::global();
            let names = registry.get_all_report_fields_names();

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&names)?);
                return Ok(());
            }

            println!("{:<28} {:<28} {:<8} {}", "Name", "Verbose name", "Type", "Summable");
            println!("{}", "-".repeat(74));
            for name in names {
                let field = registry.get_field_by_name(&name)?;
                println!(
                    "{:<28} {:<28} {:<8} {}",
                    field.name(),
                    field.verbose_name(),
                    field.column_type(),
                    if field.is_summable() { "yes" } else { "no" }
                );
            }
        }

        Commands::Windows { pattern, start, end } => {
            let pattern: TimeSeriesPattern = pattern.parse()?;
            if pattern == TimeSeriesPattern::Custom {
                bail!("custom windows come from a report definition");
            }
            let start = parse_datetime(&start).with_context(|| format!("invalid start date {}", start))?;
            let end = parse_datetime(&end).with_context(|| format!("invalid end date {}", end))?;
            let windows = time_series_windows(pattern, start, end, &[])?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&windows)?);
                return Ok(());
            }

            println!("{:<12} {:<20} {:<20} {}", "Suffix", "Start", "End", "Label");
            println!("{}", "-".repeat(80));
            for (i, window) in windows.iter().enumerate() {
                println!(
                    "{:<12} {:<20} {:<20} {}",
                    window.column_suffix(),
                    window.start.format("%Y-%m-%d %H:%M"),
                    window.end.format("%Y-%m-%d %H:%M"),
                    pattern.window_label("Total", window, i)
                );
            }
        }

        Commands::InitConfig { output } => {
            let config = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tally={}", logging.level).into());
    let json = logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn open_source(config: &SourceConfig, schema: Schema) -> anyhow::Result<Arc<dyn DataSource>> {
    let path = Path::new(&config.path);
    let source: Arc<dyn DataSource> = match config.kind {
        SourceKind::Sqlite => {
            if !path.exists() {
                bail!("database not found: {:?}", path);
            }
            Arc::new(SqliteSource::open(path, schema)?)
        }
        SourceKind::Csv => {
            let delimiter = u8::try_from(config.delimiter).context("CSV delimiter must be a single byte")?;
            Arc::new(CsvLoader::new(schema).with_delimiter(delimiter).load_dir(path)?)
        }
    };
    tracing::info!("Opened {:?} source at {:?}", config.kind, path);
    Ok(source)
}

fn format_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::Float(f)) => format!("{:.2}", f),
        Some(other) => other.to_string(),
    }
}

fn print_table(columns: &[ColumnData], rows: &[ReportRow]) {
    let columns: Vec<&ColumnData> = columns.iter().filter(|c| c.visible).collect();
    if rows.is_empty() {
        println!("No data for the selected date range");
        return;
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| format_cell(row.get(&c.name))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(c.verbose_name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    // Header
    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<w$}", c.verbose_name, w = w))
        .collect();
    println!("{}", header.join(" | "));

    // Separator
    let total: usize = widths.iter().sum::<usize>() + widths.len().saturating_sub(1) * 3;
    println!("{}", "-".repeat(total));

    for row in cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<w$}", cell, w = w))
            .collect();
        println!("{}", line.join(" | "));
    }
}

fn print_csv(columns: &[ColumnData], rows: &[ReportRow]) -> anyhow::Result<()> {
    let columns: Vec<&ColumnData> = columns.iter().filter(|c| c.visible).collect();
    let mut writer = csv::Writer::from_writer(std::io::stdout());

    writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
    for row in rows {
        writer.write_record(columns.iter().map(|c| match row.get(&c.name) {
            None | Some(Value::Null) => String::new(),
            Some(value) => value.to_string(),
        }))?;
    }
    writer.flush()?;
    Ok(())
}
