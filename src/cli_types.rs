use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "buildlore")]
#[command(about = "Discover compiler invocations from make builds and inspect precompiled-header inputs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the per-user buildlore.toml)
    #[arg(short, long, global = true, env = "BUILDLORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a makefile and print every compiler invocation it performs
    Run(RunArgs),
    /// Expand a header's includes and print the files it depends on
    Headers(HeadersArgs),
    /// Show the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Makefile to build
    pub makefile: PathBuf,

    /// Output format: json or text
    #[arg(short, long, default_value = "json")]
    pub format: String,

    /// Flag added to every parsed invocation (repeatable)
    #[arg(long = "extra-flag", allow_hyphen_values = true)]
    pub extra_flags: Vec<String>,

    /// Build program to run instead of the configured one
    #[arg(long)]
    pub program: Option<String>,

    /// Arguments passed through to make
    #[arg(last = true)]
    pub make_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct HeadersArgs {
    /// Header to expand
    pub header: PathBuf,

    /// Include search path (repeatable)
    #[arg(short = 'I', long = "include")]
    pub include_paths: Vec<PathBuf>,

    /// Output format: json or text
    #[arg(short, long, default_value = "text")]
    pub format: String,
}
