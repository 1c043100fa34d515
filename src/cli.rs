//! CLI argument parsing for unigrams

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::context::StackKind;
use crate::report::ByteOrder;

/// Byte order of written reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ByteOrderArg {
    /// Host byte order (default)
    Native,
    /// Little endian
    Little,
    /// Big endian
    Big,
}

impl From<ByteOrderArg> for ByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Native => ByteOrder::Native,
            ByteOrderArg::Little => ByteOrder::Little,
            ByteOrderArg::Big => ByteOrder::Big,
        }
    }
}

/// How replayed call-stack signatures are derived
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StackKindArg {
    /// Address space only
    Asid,
    /// Stack pointer heuristic
    Heuristic,
    /// Address space and thread
    Threaded,
}

impl From<StackKindArg> for StackKind {
    fn from(arg: StackKindArg) -> Self {
        match arg {
            StackKindArg::Asid => StackKind::Asid,
            StackKindArg::Heuristic => StackKind::Heuristic,
            StackKindArg::Threaded => StackKind::Threaded,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "unigrams")]
#[command(version)]
#[command(about = "Per-context byte histograms of traced memory reads and writes", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a recorded JSON-lines access trace and write both reports
    Replay(ReplayArgs),

    /// Decode a report and print its contexts
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines trace file ("-" for stdin)
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// TOML config file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Read report destination
    #[arg(long = "read-report", value_name = "FILE")]
    pub read_report: Option<PathBuf>,

    /// Write report destination
    #[arg(long = "write-report", value_name = "FILE")]
    pub write_report: Option<PathBuf>,

    /// Directory for relative report paths
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Address field width in bytes (4 or 8)
    #[arg(long = "word-width", value_name = "BYTES")]
    pub word_width: Option<u32>,

    /// Report byte order
    #[arg(long = "byte-order", value_enum)]
    pub byte_order: Option<ByteOrderArg>,

    /// Call-stack signature used for replayed contexts
    #[arg(long = "stack-kind", value_enum, default_value = "asid")]
    pub stack_kind: StackKindArg,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Report file to decode
    #[arg(value_name = "REPORT")]
    pub report: PathBuf,

    /// Emit the decoded report as JSON
    #[arg(long = "json")]
    pub json: bool,
}
