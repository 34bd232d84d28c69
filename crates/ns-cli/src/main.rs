//! NanoEvents CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ns_nanoevents::NanoEventsFactory;
use ns_nanoevents::factory::FactoryOptions;
use ns_nanoevents::schemas::schema_from_name;

#[derive(Parser)]
#[command(name = "nanoevents")]
#[command(about = "NanoEvents - schema-driven views over columnar event data")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Input Parquet file
    #[arg(short, long)]
    input: PathBuf,

    /// Schema name (base, nanoaod, pfnanoaod, treemaker, physlite, delphes).
    /// Overrides the schema of `--config`.
    #[arg(long)]
    schema: Option<String>,

    /// Factory options (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// First entry to read
    #[arg(long)]
    entry_start: Option<u64>,

    /// Stop entry (exclusive)
    #[arg(long)]
    entry_stop: Option<u64>,

    /// Threads (0 = auto)
    #[arg(long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema form as JSON
    Inspect {
        #[command(flatten)]
        source: SourceArgs,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the fields and behavior of one collection
    Fields {
        #[command(flatten)]
        source: SourceArgs,

        /// Collection name (e.g. Jet)
        #[arg(short, long)]
        collection: String,
    },

    /// Print per-event values of a collection or one of its fields
    Dump {
        #[command(flatten)]
        source: SourceArgs,

        /// Collection or top-level branch name
        #[arg(short, long)]
        collection: String,

        /// Field of the collection; the whole collection if omitted
        #[arg(short, long)]
        field: Option<String>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { source, output } => cmd_inspect(&source, output.as_ref()),
        Commands::Fields { source, collection } => cmd_fields(&source, &collection),
        Commands::Dump { source, collection, field, output } => {
            cmd_dump(&source, &collection, field.as_deref(), output.as_ref())
        }
    }
}

fn load_options(args: &SourceArgs) -> Result<FactoryOptions> {
    let mut options = match (&args.config, &args.schema) {
        (Some(path), schema) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let mut doc: serde_json::Value = serde_json::from_str(&json)
                .with_context(|| format!("parsing config {}", path.display()))?;
            // `--schema` replaces the config's schema; its NanoAOD flags are checked against it.
            if let (Some(name), Some(obj)) = (schema, doc.as_object_mut()) {
                obj.insert("schema".to_string(), serde_json::Value::String(name.clone()));
            }
            FactoryOptions::from_json(&doc.to_string())
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        (None, Some(name)) => FactoryOptions::new().schema_arc(schema_from_name(name)?),
        (None, None) => FactoryOptions::default(),
    };
    if let Some(start) = args.entry_start {
        options = options.entry_start(start);
    }
    if let Some(stop) = args.entry_stop {
        options = options.entry_stop(stop);
    }
    Ok(options)
}

fn open_factory(args: &SourceArgs) -> Result<NanoEventsFactory> {
    if args.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global();
    }

    let options = load_options(args)?;
    tracing::info!(path = %args.input.display(), schema = options.schema.name(), "opening input");
    let factory = NanoEventsFactory::from_parquet(&args.input, options)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let (start, stop) = factory.entry_range();
    tracing::info!(
        partition = factory.partition_key(),
        entries = stop - start,
        "factory ready"
    );
    Ok(factory)
}

fn cmd_inspect(args: &SourceArgs, output: Option<&PathBuf>) -> Result<()> {
    let factory = open_factory(args)?;
    let (start, stop) = factory.entry_range();
    let output_json = serde_json::json!({
        "schema": factory.schema().name(),
        "partition_key": factory.partition_key(),
        "entry_start": start,
        "entry_stop": stop,
        "fields": factory.form().fields(),
        "form": serde_json::to_value(factory.form())?,
    });
    write_json(output, output_json)
}

fn cmd_fields(args: &SourceArgs, collection: &str) -> Result<()> {
    let factory = open_factory(args)?;
    let events = factory.events();
    let coll = events.collection(collection)?;
    let behavior = coll.behavior_name().map(str::to_string);

    let fields: Vec<serde_json::Value> = coll
        .fields()
        .into_iter()
        .filter_map(|name| {
            let form = coll.form().innermost().field(name)?;
            Some(serde_json::json!({
                "name": name,
                "class": form.class_name(),
                "list_depth": form.list_depth(),
                "target": form.innermost().parameter(ns_nanoevents::form::PARAM_TARGET),
                "doc": form.parameter(ns_nanoevents::form::PARAM_DOC),
            }))
        })
        .collect();
    let links = behavior
        .as_deref()
        .and_then(|b| events.behavior().get(b))
        .map(|m| serde_json::to_value(&m.links))
        .transpose()?;

    let output_json = serde_json::json!({
        "collection": collection,
        "behavior": behavior,
        "jagged": coll.is_jagged(),
        "fields": fields,
        "links": links,
    });
    write_json(None, output_json)
}

fn cmd_dump(
    args: &SourceArgs,
    collection: &str,
    field: Option<&str>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let factory = open_factory(args)?;
    let events = factory.events();
    let values = match field {
        Some(f) => events.collection(collection)?.field(f)?,
        None => events.get(collection)?,
    };
    let (start, stop) = factory.entry_range();
    let stats = factory.cache().stats();
    tracing::info!(entries = stats.entries, bytes = stats.bytes, "columns loaded");

    let output_json = serde_json::json!({
        "collection": collection,
        "field": field,
        "entry_start": start,
        "entry_stop": stop,
        "values": values.to_json_values(),
    });
    write_json(output, output_json)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
