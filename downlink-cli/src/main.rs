//! CLI for the downlink telemetry ingestion pipeline.
//!
//! Provides commands for converting telemetry files to line protocol,
//! sending them to a time-series store, and querying data back.

mod scenarios;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use downlink::{
    Client, CsvSource, Destination, FluxValue, Precision, RangeQuery, WriteMode, WriteOptions,
};

/// downlink — Telemetry-to-time-series ingestion CLI.
#[derive(Parser)]
#[command(name = "downlink", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Convert a telemetry file to line protocol without sending it.
    Convert {
        /// Path to the source file.
        input: PathBuf,

        /// Write lines here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        shape: ShapeArgs,
    },

    /// Send a telemetry file (or a canned sample scenario) to the store.
    Send {
        #[command(flatten)]
        dest: DestArgs,

        /// Path to the source file; omit to send the chosen sample scenario.
        input: Option<PathBuf>,

        #[command(flatten)]
        shape: ShapeArgs,

        /// Sample to send when no input file is given.
        #[arg(long, default_value = "sample-point", conflicts_with = "input")]
        scenario: Scenario,

        /// Entries per request; 0 sends every write immediately.
        #[arg(long, default_value = "0")]
        batch_size: usize,

        /// Timestamp precision for the write request.
        #[arg(long, default_value = "ns")]
        precision: PrecisionArg,
    },

    /// Query recent data back from the store.
    Query {
        #[command(flatten)]
        dest: DestArgs,

        /// Time range to query (e.g., "1h", "30m", "90s").
        #[arg(long, default_value = "1m")]
        range: String,

        /// Keep only rows from this measurement.
        #[arg(long)]
        measurement: Option<String>,

        /// Keep only rows for this field.
        #[arg(long)]
        field: Option<String>,

        /// Raw Flux script to run instead of building one.
        #[arg(long, conflicts_with_all = ["range", "measurement", "field"])]
        flux: Option<String>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },
}

/// Destination settings, from flags or the `INFLUX_*` environment.
#[derive(Args)]
struct DestArgs {
    /// Store URL.
    #[arg(long, env = "INFLUX_URL")]
    url: String,

    /// API token.
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    token: String,

    /// Organization name.
    #[arg(long, env = "INFLUX_ORG")]
    org: String,

    /// Target bucket.
    #[arg(long, env = "INFLUX_BUCKET")]
    bucket: String,

    /// HTTP timeout in seconds.
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

impl DestArgs {
    fn destination(&self) -> Destination {
        Destination::new(&self.url, &self.token, &self.org, &self.bucket)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

/// How source rows become measurement entries.
#[derive(Args)]
struct ShapeArgs {
    /// Measurement name for encoded entries.
    #[arg(long, default_value = "coordinates")]
    measurement: String,

    /// Tag to attach to every entry, as KEY=VALUE. Repeatable.
    #[arg(long = "tag", value_name = "KEY=VALUE", default_values = ["type=TELEM"])]
    tags: Vec<String>,

    /// Column to encode as a float field. Repeatable.
    #[arg(
        long = "field",
        value_name = "COLUMN",
        default_values = ["pos_eci_x", "pos_eci_y", "pos_eci_z", "latitude", "longitude"]
    )]
    fields: Vec<String>,

    /// Column holding each row's timestamp.
    #[arg(long, default_value = "datetime")]
    time_column: String,
}

/// Canned payloads for `send` without an input file. Both write the same
/// memory reading; they differ only in how it is submitted.
#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    /// One structured entry, built field by field.
    SamplePoint,
    /// The same entry as raw pre-formatted line protocol.
    SampleLines,
}

/// Timestamp precision names accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
enum PrecisionArg {
    /// Nanoseconds.
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
}

impl From<PrecisionArg> for Precision {
    fn from(arg: PrecisionArg) -> Self {
        match arg {
            PrecisionArg::Ns => Self::Nanoseconds,
            PrecisionArg::Us => Self::Microseconds,
            PrecisionArg::Ms => Self::Milliseconds,
            PrecisionArg::S => Self::Seconds,
        }
    }
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with a rows array.
    Json,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Convert {
            input,
            output,
            shape,
        } => cmd_convert(&input, output.as_deref(), &shape),
        Commands::Send {
            dest,
            input,
            shape,
            scenario,
            batch_size,
            precision,
        } => cmd_send(&dest, input.as_deref(), &shape, scenario, batch_size, precision),
        Commands::Query {
            dest,
            range,
            measurement,
            field,
            flux,
            format,
        } => cmd_query(
            &dest,
            &range,
            measurement.as_deref(),
            field.as_deref(),
            flux.as_deref(),
            &format,
        ),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

/// Implements `downlink convert <input>`.
fn cmd_convert(
    input: &Path,
    output: Option<&Path>,
    shape: &ShapeArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = CsvSource::open(input, scenarios::schema(&shape.time_column, &shape.fields))?;
    let layout = scenarios::layout(&shape.measurement, &shape.tags, &shape.fields)?;

    let mut lines = Vec::new();
    for record in source.records()? {
        lines.push(layout.encode(&record?)?.to_line()?);
    }

    match output {
        Some(path) => {
            std::fs::write(path, lines.join("\n") + "\n")?;
            tracing::info!("wrote {} line(s) to {}", lines.len(), path.display());
        }
        None => {
            for line in &lines {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Implements `downlink send [input]`.
fn cmd_send(
    dest: &DestArgs,
    input: Option<&Path>,
    shape: &ShapeArgs,
    scenario: Scenario,
    batch_size: usize,
    precision: PrecisionArg,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect(dest.destination())?;

    let mode = if batch_size == 0 {
        WriteMode::Synchronous
    } else {
        WriteMode::Buffered {
            capacity: batch_size,
        }
    };
    let options = WriteOptions::new()
        .with_mode(mode)
        .with_precision(precision.into());
    let mut writer = client.writer(options);

    let mut accepted = 0usize;
    match input {
        Some(path) => {
            let source =
                CsvSource::open(path, scenarios::schema(&shape.time_column, &shape.fields))?;
            let layout = scenarios::layout(&shape.measurement, &shape.tags, &shape.fields)?;

            for record in source.records()? {
                accepted += writer.write(layout.encode(&record?)?)?;
            }
        }
        None => match scenario {
            Scenario::SamplePoint => {
                tracing::info!("no input file; sending the structured sample entry");
                accepted += writer.write(scenarios::sample_point())?;
            }
            Scenario::SampleLines => {
                tracing::info!("no input file; sending the sample as raw line protocol");
                accepted += writer.write(scenarios::sample_lines())?;
            }
        },
    }
    writer.flush()?;

    tracing::info!(
        "sent {accepted} entr{} to bucket '{}'",
        if accepted == 1 { "y" } else { "ies" },
        client.destination().bucket
    );

    Ok(())
}

/// Implements `downlink query`.
fn cmd_query(
    dest: &DestArgs,
    range: &str,
    measurement: Option<&str>,
    field: Option<&str>,
    flux: Option<&str>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect(dest.destination())?;

    let rows = match flux {
        Some(script) => client.query_raw(script)?,
        None => {
            let mut query = RangeQuery::last(parse_duration(range)?);
            if let Some(measurement) = measurement {
                query = query.measurement(measurement);
            }
            if let Some(field) = field {
                query = query.field(field);
            }
            client.query(&query)?
        }
    };

    let records = rows.collect::<downlink::Result<Vec<_>>>()?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# bucket={}, rows={}",
                client.destination().bucket,
                records.len()
            );
            println!("time,measurement,field,value");
            for record in &records {
                println!(
                    "{},{},{},{}",
                    record.get("_time").map(ToString::to_string).unwrap_or_default(),
                    record.measurement().unwrap_or(""),
                    record.field().unwrap_or(""),
                    record.value().map(ToString::to_string).unwrap_or_default(),
                );
            }
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = records
                .iter()
                .map(|record| {
                    serde_json::json!({
                        "time": record.get("_time").map(value_to_json),
                        "measurement": record.measurement(),
                        "field": record.field(),
                        "value": record.value().map(value_to_json),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "bucket": client.destination().bucket,
                "count": records.len(),
                "rows": rows,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Maps a typed query cell to its natural JSON representation.
fn value_to_json(value: &FluxValue) -> serde_json::Value {
    match value {
        FluxValue::String(s) => serde_json::json!(s),
        FluxValue::Double(v) => serde_json::json!(v),
        FluxValue::Long(v) => serde_json::json!(v),
        FluxValue::UnsignedLong(v) => serde_json::json!(v),
        FluxValue::Boolean(b) => serde_json::json!(b),
        FluxValue::Time(t) => serde_json::json!(t.to_rfc3339()),
    }
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "90s").
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    let (num_str, unit_secs) = if let Some(rest) = s.strip_suffix('s') {
        (rest, 1)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3600)
    } else if let Some(rest) = s.strip_suffix('d') {
        (rest, 86_400)
    } else {
        return Err(format!("Unknown duration unit in '{s}'. Use s, m, h, or d.").into());
    };

    let num: u64 = num_str.parse()?;
    let secs = num
        .checked_mul(unit_secs)
        .ok_or_else(|| format!("Duration '{s}' is too large"))?;

    Ok(Duration::from_secs(secs))
}
