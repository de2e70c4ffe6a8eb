//! genhcl cli interface

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
    /// This is equivalent to running { cd <directory>; genhcl ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate the artifacts of a stack
    ///
    /// Prints the artifacts unless --write is given
    #[command(alias = "gen")]
    Generate(GenerateCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct ProjectArgs {
    /// Project root directory, defaults to the work directory
    #[clap(short = 'r', long = "root")]
    pub root: Option<PathBuf>,

    /// Stack path inside the project, e.g. /stacks/prod
    #[clap(short = 's', long = "stack")]
    pub stack: String,

    /// Stack path relative to the repository root, when the project is not the repository root
    ///
    /// Matched by `stack_filter.repository_paths`. Defaults to the stack path.
    #[clap(long = "repository-path")]
    pub repository_path: Option<String>,
}

#[derive(Parser, Debug)]
pub struct GenerateCommand {
    #[clap(flatten)]
    pub project: ProjectArgs,

    /// Define a global, e.g. -g 'env="prod"'
    ///
    /// The value is an hcl expression. Can be specified multiple times.
    #[clap(short = 'g', long = "global", value_parser = parse_global)]
    pub globals: Vec<(String, String)>,

    /// Write applicable artifacts into the stack directory
    ///
    /// Existing files are only replaced when they were generated before.
    #[clap(short = 'w', long = "write")]
    pub write: bool,

    /// Project directory vendored modules are placed in
    #[clap(long = "vendor-dir", default_value = genhcl::vendor::DEFAULT_VENDOR_DIR)]
    pub vendor_dir: String,

    #[clap(flatten)]
    pub output: OutputArgs,
}

fn parse_global(s: &str) -> Result<(String, String), String> {
    let (name, expr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=<expression>, got {s:?}"))?;

    Ok((name.trim().to_string(), expr.trim().to_string()))
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
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Generation blocks visible from a stack, nearest first
    Blocks(ProjectArgs),
}
