use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use connector_compiler::{
    CompiledConnector, CompilerConfig, ConnectorCompiler, ConnectorError, InputFormat,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "connector-compiler")]
#[command(about = "Connector model compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Flat,
    Json,
    Yaml,
}

impl From<Format> for InputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Flat => InputFormat::Flat,
            Format::Json => InputFormat::Json,
            Format::Yaml => InputFormat::Yaml,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one connector and write its artifact (model + execution plan).
    Compile {
        #[arg(long)]
        input: PathBuf,

        /// Defaults to a guess from the input file extension.
        #[arg(long, value_enum)]
        format: Option<Format>,

        /// JSON compiler configuration.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        fail_on_problems: bool,

        /// Connector id. Defaults to the input file stem.
        #[arg(long)]
        id: Option<String>,

        /// Compiled parent connector to inherit from.
        #[arg(long)]
        extends: Option<PathBuf>,

        #[arg(short = 'o', long)]
        out: PathBuf,
    },
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Compile {
            input,
            format,
            config,
            fail_on_problems,
            id,
            extends,
            out,
        } => {
            let mut config: CompilerConfig = match &config {
                Some(path) => serde_json::from_str(&read(path)?)
                    .with_context(|| format!("invalid config {}", path.display()))?,
                None => CompilerConfig::default(),
            };
            config.fail_on_problems |= fail_on_problems;

            let id = match id {
                Some(id) => id,
                None => input
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .context("cannot derive a connector id from the input path; pass --id")?,
            };

            // 1) Read assignments.
            let format = format.map_or_else(|| InputFormat::from_path(&input), InputFormat::from);
            let assignments = format
                .read(&read(&input)?)
                .with_context(|| format!("failed to parse {}", input.display()))?;

            // 2) Apply them, then inherit from the parent.
            let mut compiler = ConnectorCompiler::new(id.clone(), config);
            compiler
                .apply_all(assignments)
                .map_err(|err| ConnectorError::new(id.clone(), err))?;
            if let Some(parent) = &extends {
                let parent = CompiledConnector::from_json(&read(parent)?)
                    .with_context(|| format!("invalid parent artifact {}", parent.display()))?;
                compiler.extend_from(&parent.connector);
            }

            // 3) Finalize and write.
            let compiled = compiler
                .finish()
                .map_err(|err| ConnectorError::new(id.clone(), err))?;
            for problem in &compiled.problems {
                eprintln!("warning: {}", problem.message);
            }
            let json = compiled.to_json()?;
            std::fs::write(&out, json)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Wrote {} ({} sources planned)",
                out.display(),
                compiled.plan.source_count()
            );
        }
    }

    Ok(())
}
