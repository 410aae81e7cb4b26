//! deckhand cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; deckhand ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    /// Engine configuration (yaml)
    #[clap(long = "config", global(true))]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render documents: layering, substitution and validation
    ///
    /// Reads documents from stdin unless any other source is provided (via --input-*)
    Render(RenderCommand),

    /// Check documents without rendering them
    Validate(ValidateCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct RenderCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Secrets by reference (yaml mapping) for encrypted documents
    #[clap(long = "secrets")]
    pub secrets: Option<PathBuf>,

    /// Revision id the result is cached under
    #[clap(long = "revision", default_value_t = 0)]
    pub revision: u64,

    /// Skip substitutions with missing sources instead of failing
    #[clap(long = "permissive")]
    pub permissive: bool,

    /// Do not validate the rendered documents
    #[clap(long = "no-post-validate")]
    pub no_post_validate: bool,

    /// Also output control documents (LayeringPolicy, DataSchema, ...)
    #[clap(long = "include-control")]
    pub include_control: bool,

    /// Output secrets in clear text instead of their digest
    #[clap(long = "cleartext-secrets")]
    pub cleartext_secrets: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateCommand {
    #[clap(flatten)]
    pub input: InputArgs,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load files from work directory
    #[clap(short = 'w', long = "input-workdir")]
    pub workdir: bool,

    /// Load a file
    #[clap(short = 'f', long = "input-file")]
    pub files: Vec<PathBuf>,

    /// Load files from given directory
    #[clap(short = 'd', long = "input-dir")]
    pub directories: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded documents and their source files
    Documents,
    /// Render order
    Order,
}
