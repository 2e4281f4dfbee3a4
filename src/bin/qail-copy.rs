//! qail-copy — Arrow to PostgreSQL bulk loader
//!
//! # Usage
//!
//! ```bash
//! # Load an Arrow IPC file
//! qail-copy load events.arrow --table events --database-url postgres://localhost/app
//!
//! # Binary format, empty the table first
//! qail-copy load events.arrow --table events --format binary --truncate
//!
//! # Dry run: write the COPY stream to a file instead of a server
//! qail-copy load events.arrow --table events --dry-run --output events.copy
//!
//! # Show the COPY command only
//! qail-copy command --table events --columns id,tags
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, bail};
use arrow::array::RecordBatch;
use arrow::datatypes::{DataType, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::reader::{FileReader, StreamReader};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use qail_copy::prelude::*;
use qail_copy::protocol::pg_type_oid;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

/// Leading magic of the Arrow IPC file format (the stream format has none).
const ARROW_FILE_MAGIC: &[u8; 6] = b"ARROW1";

#[derive(Parser)]
#[command(name = "qail-copy")]
#[command(author = "QAIL Contributors")]
#[command(version)]
#[command(about = "🪝 Bulk-load Arrow data into PostgreSQL with COPY", long_about = None)]
#[command(after_help = "EXAMPLES:
    qail-copy load events.arrow --table events
    qail-copy load events.arrows --table events --schema raw --format binary --truncate
    qail-copy load events.arrow --table events --dry-run --output events.copy
    qail-copy command --table events --columns id,tags")]
struct Cli {
    /// Settings file (default: ./qail-copy.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an Arrow IPC file or stream into a table
    Load(LoadArgs),
    /// Print the COPY command a load would issue
    Command {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        encoding: EncodingArgs,
    },
}

#[derive(Args)]
struct LoadArgs {
    /// Arrow IPC file or stream
    file: PathBuf,

    #[command(flatten)]
    target: TargetArgs,

    #[command(flatten)]
    encoding: EncodingArgs,

    /// Database connection URL
    #[arg(long, env = "QAIL_DATABASE_URL")]
    database_url: Option<String>,

    /// TRUNCATE the table before loading
    #[arg(long)]
    truncate: bool,

    /// Don't connect, write the COPY stream instead
    #[arg(short, long)]
    dry_run: bool,

    /// Dry-run destination (default: stdout)
    #[arg(short, long, requires = "dry_run")]
    output: Option<PathBuf>,

    /// Summary format
    #[arg(long, value_enum, default_value = "table")]
    output_format: OutputFormat,
}

#[derive(Args)]
struct TargetArgs {
    /// Target table
    #[arg(short, long)]
    table: String,

    /// Target schema
    #[arg(short, long)]
    schema: Option<String>,

    /// Target columns (default: the Arrow field names)
    #[arg(short, long, value_delimiter = ',')]
    columns: Vec<String>,
}

#[derive(Args)]
struct EncodingArgs {
    /// COPY wire format
    #[arg(short, long, value_enum)]
    format: Option<CopyFormat>,

    /// Text format NULL marker
    #[arg(long)]
    null_marker: Option<String>,

    /// Text format column delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Substitute for NUL bytes in text values
    #[arg(long)]
    pg_null_byte_replacement: Option<String>,

    /// Rows per transmitted chunk
    #[arg(long)]
    batch_rows: Option<usize>,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct LoadReport {
    table: String,
    format: CopyFormat,
    dry_run: bool,
    batches: usize,
    rows: u64,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "qail_copy=debug" } else { "qail_copy=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?),
        )
        .init();

    let (settings, source) = Settings::discover(cli.config.as_deref())?;
    if let Some(path) = &source {
        tracing::debug!("Loaded settings from {}", path.display());
    }

    match cli.command {
        Commands::Load(args) => load(args, &settings).await,
        Commands::Command { target, encoding } => {
            let options = encoding.apply(settings.copy_options()?)?;
            let target = target.to_target(None);
            println!("{}", target.copy_command(&options));
            Ok(())
        }
    }
}

impl TargetArgs {
    /// Explicit columns win; otherwise the input's field names, if known.
    fn to_target(&self, schema: Option<&SchemaRef>) -> CopyTarget {
        let mut target = CopyTarget::new(&self.table);
        if let Some(s) = &self.schema {
            target = target.schema(s);
        }
        if !self.columns.is_empty() {
            target.columns(self.columns.iter().cloned())
        } else if let Some(schema) = schema {
            target.columns(schema.fields().iter().map(|f| f.name().clone()))
        } else {
            target
        }
    }
}

impl EncodingArgs {
    /// Override settings-file options with flags, then re-validate.
    fn apply(&self, mut options: CopyOptions) -> anyhow::Result<CopyOptions> {
        if let Some(format) = self.format {
            options.format = format;
        }
        if let Some(marker) = &self.null_marker {
            options.null_marker = marker.clone();
        }
        if let Some(delimiter) = self.delimiter {
            options.delimiter = delimiter;
        }
        if let Some(replacement) = &self.pg_null_byte_replacement {
            options.null_byte_replacement = Some(replacement.clone());
        }
        if let Some(rows) = self.batch_rows {
            options.batch_rows = rows;
        }
        options.validate()?;
        Ok(options)
    }
}

type Batches = Box<dyn Iterator<Item = Result<RecordBatch, ArrowError>>>;

/// Open an Arrow IPC file, falling back to the stream format.
fn open_input(path: &Path) -> anyhow::Result<(SchemaRef, Batches)> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut magic = [0u8; 6];
    let is_file_format = file.read_exact(&mut magic).is_ok() && &magic == ARROW_FILE_MAGIC;
    file.seek(SeekFrom::Start(0))?;

    if is_file_format {
        let reader = FileReader::try_new(file, None)
            .with_context(|| format!("Failed to read Arrow file {}", path.display()))?;
        let schema = reader.schema();
        let batches: Batches = Box::new(reader);
        Ok((schema, batches))
    } else {
        let reader = StreamReader::try_new(BufReader::new(file), None)
            .with_context(|| format!("Failed to read Arrow stream {}", path.display()))?;
        let schema = reader.schema();
        let batches: Batches = Box::new(reader);
        Ok((schema, batches))
    }
}

async fn load(args: LoadArgs, settings: &Settings) -> anyhow::Result<()> {
    let options = args.encoding.apply(settings.copy_options()?)?;
    let (schema, batches) = open_input(&args.file)?;
    let target = args.target.to_target(Some(&schema));

    if options.format == CopyFormat::Binary {
        let unsupported = schema
            .fields()
            .iter()
            // An all-null column is sent as -1 lengths and needs no type.
            .filter(|field| field.data_type() != &DataType::Null)
            .find(|field| pg_type_oid(field.data_type()).is_none());
        if let Some(field) = unsupported {
            bail!(
                "Column {} ({}) has no binary COPY encoding, use --format text",
                field.name(),
                field.data_type()
            );
        }
    }

    tracing::debug!(
        "Loading {} into {} ({} format)",
        args.file.display(),
        target.qualified_name(),
        options.format
    );

    let started = Instant::now();
    let outcome = if args.dry_run {
        let out: Box<dyn Write + Send> = match &args.output {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Box::new(std::io::stdout()),
        };
        let mut channel = DumpChannel::new(out);
        let outcome = copy(&mut channel, &options, &target, batches, args.truncate).await;
        for statement in channel.statements() {
            eprintln!("{} {}", "SQL:".dimmed(), statement.yellow());
        }
        // Nothing counts rows on the other end of a dump.
        outcome.map(|(batches, sent, _)| (batches, sent))?
    } else {
        let Some(url) = args.database_url.as_ref().or(settings.database_url.as_ref()) else {
            bail!(
                "No database URL. Use --database-url, set QAIL_DATABASE_URL, \
                 or add database_url to the settings file"
            );
        };
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .context("Failed to connect to database")?;
        // TRUNCATE and COPY commit together or not at all.
        let mut tx = pool.begin().await.context("Failed to start transaction")?;
        let result = {
            let mut channel = SqlxChannel::new(&mut *tx);
            copy(&mut channel, &options, &target, batches, args.truncate).await
        };
        match result {
            Ok((batches, _, copied)) => {
                tx.commit().await.context("Failed to commit load")?;
                (batches, copied)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Failed to roll back load: {}", rollback);
                }
                return Err(e);
            }
        }
    };

    let report = LoadReport {
        table: target.qualified_name(),
        format: options.format,
        dry_run: args.dry_run,
        batches: outcome.0,
        rows: outcome.1,
        elapsed_ms: started.elapsed().as_millis(),
    };
    let to_stderr = args.dry_run && args.output.is_none();
    print_report(&report, &args.output_format, to_stderr)
}

/// Run one COPY over `channel`: `(batches, rows sent, rows reported)`.
async fn copy<C: CopyChannel>(
    channel: &mut C,
    options: &CopyOptions,
    target: &CopyTarget,
    batches: Batches,
    truncate: bool,
) -> anyhow::Result<(usize, u64, u64)> {
    if truncate {
        let sql = format!("TRUNCATE {}", target.qualified_name());
        if let ExecStatus::Error(message) = channel.execute(&sql).await {
            bail!("Failed to truncate {}: {}", target.qualified_name(), message);
        }
        tracing::info!("Truncated {}", target.qualified_name());
    }

    let mut session = CopySession::new(channel, options.clone())?;
    session.begin(target).await?;

    let count = match stream(&mut session, batches).await {
        Ok(count) => count,
        Err(e) => {
            abort_quietly(&mut session, &e).await;
            return Err(e);
        }
    };
    let copied = match session.finish().await {
        Ok(rows) => rows,
        Err(e) => {
            let e = anyhow::Error::from(e);
            abort_quietly(&mut session, &e).await;
            return Err(e);
        }
    };
    Ok((count, session.rows_sent(), copied))
}

async fn stream<C: CopyChannel>(
    session: &mut CopySession<'_, C>,
    batches: Batches,
) -> anyhow::Result<usize> {
    let mut count = 0;
    for batch in batches {
        let batch = batch.context("Failed to read Arrow batch")?;
        session.copy_batch(&batch).await?;
        count += 1;
        tracing::debug!("Batch {}: {} rows", count, batch.num_rows());
    }
    Ok(count)
}

/// Leave the connection usable after a failed load.
async fn abort_quietly<C: CopyChannel>(session: &mut CopySession<'_, C>, cause: &anyhow::Error) {
    if !matches!(session.state(), SessionState::Active | SessionState::Failed) {
        return;
    }
    if let Err(e) = session.abort(&format!("{:#}", cause)).await {
        tracing::warn!("Failed to abort COPY: {}", e);
    }
}

fn print_report(report: &LoadReport, format: &OutputFormat, to_stderr: bool) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Table => {
            let mode = if report.dry_run { "dry run" } else { "copied" };
            let rows = [
                ("table", report.table.clone()),
                ("format", report.format.to_string()),
                ("batches", report.batches.to_string()),
                ("rows", report.rows.to_string()),
                ("elapsed", format!("{} ms", report.elapsed_ms)),
            ];
            let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
            let mut lines = vec![format!("{} {}", "✓".green(), mode.green().bold())];
            for (key, value) in rows {
                lines.push(format!("  {:width$} │ {}", key.dimmed(), value.cyan(), width = width));
            }
            lines.join("\n")
        }
    };
    if to_stderr {
        eprintln!("{}", text);
    } else {
        println!("{}", text);
    }
    Ok(())
}
