mod disk;
mod ingest;
mod record;
mod schedule;

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

use pvrd_core::error::Error;
use pvrd_core::tracing_ext::init_tracing;
use pvrd_core::*;

#[derive(Parser)]
#[command(author, version, about)]
struct CommandLine {
    /// Path to a configuration file in a YAML format.
    ///
    /// The PVRD_CONFIG environment variable is used if this option is not
    /// specified.
    #[arg(short, long, env = "PVRD_CONFIG")]
    config: PathBuf,

    /// Logging format.
    #[arg(long, value_enum, env = "PVRD_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Ingest(ingest::CommandLine),
    Schedule(schedule::CommandLine),
    Disk(disk::CommandLine),
    Record(record::CommandLine),
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

fn main() -> Result<(), Error> {
    let cl = CommandLine::parse();

    init_tracing(cl.log_format.as_str());

    let config = config::load(&cl.config)?;

    match cl.command {
        Command::Ingest(ref sub) => ingest::main(config, sub),
        Command::Schedule(ref sub) => schedule::main(config, sub),
        Command::Disk(ref sub) => disk::main(config, sub),
        Command::Record(ref sub) => record::main(config, sub),
    }
}
