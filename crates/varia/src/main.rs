use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use varia_core::{Context, RuntimeConfig, Value, VariantError};
use varia_json::{write_json, Reader, WriteOptions};

#[derive(Parser)]
#[command(name = "varia", about = "Read, check and format varia wire documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a document and print it re-serialized
    Fmt {
        file: PathBuf,

        /// Indent with tabs, one map entry per line
        #[arg(long)]
        pretty: bool,

        /// Emit strictly JSON-compliant strings
        #[arg(long)]
        compliant: bool,
    },
    /// Read a document and report whether it is well formed
    Check { file: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::with_config(RuntimeConfig::from_env());

    let result = match &cli.command {
        Command::Fmt {
            file,
            pretty,
            compliant,
        } => {
            let options = WriteOptions {
                pretty: *pretty,
                compliant: *compliant,
            };
            let text = load(file);
            ctx.recover(|ctx| {
                let value = read_document(ctx, file, &text)?;
                write_json(ctx, &value, &options)
            })
        }
        Command::Check { file } => {
            let text = load(file);
            ctx.recover(|ctx| read_document(ctx, file, &text))
                .map(|value| format!("ok: {}", summary(&value)))
        }
    };

    match result {
        Ok(out) => println!("{out}"),
        Err(e) => {
            eprintln!("{}", e.report());
            std::process::exit(1);
        }
    }
}

fn load(file: &Path) -> String {
    match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading {}: {e}", file.display());
            std::process::exit(1);
        }
    }
}

/// `@eval` strings are kept as text: the tool never runs embedded code.
fn read_document(ctx: &Context, file: &Path, text: &str) -> Result<Value, VariantError> {
    let name = file.display().to_string();
    let value = Reader::new().file(&name).read(ctx, text)?;
    tracing::debug!(file = %name, kind = %value.kind(), "read document");
    Ok(value)
}

fn summary(value: &Value) -> String {
    match value {
        Value::Map(m) => format!("map with {} entries", m.len()),
        Value::List(l) => format!("list with {} items", l.len()),
        Value::String(s) => format!("string of {} characters", s.char_count()),
        other => other.type_name().to_string(),
    }
}
