use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod emit;
pub mod listen;
pub mod ping;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen and print received events.
    Listen(ListenArgs),
    /// Dial and emit a single event.
    Emit(EmitArgs),
    /// Dial and measure round-trip time.
    Ping(PingArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Emit(args) => emit::run(args, format),
        Command::Ping(args) => ping::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind, e.g. 127.0.0.1:4550.
    pub addr: String,
    /// Event keys to print. May be given multiple times.
    #[arg(long = "event", value_name = "KEY")]
    pub events: Vec<String>,
    /// Also print raw (non pub/sub) data frames.
    #[arg(long)]
    pub raw: bool,
    /// Exit after printing this many entries.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct EmitArgs {
    /// Address to connect to.
    pub addr: String,
    /// Event key to emit.
    pub event: String,
    /// Event argument as a JSON value; bare words are taken as strings.
    /// May be given multiple times.
    #[arg(long = "arg", value_name = "JSON")]
    pub args: Vec<String>,
    /// Send a linger request before emitting.
    #[arg(long)]
    pub linger: bool,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Address to connect to.
    pub addr: String,
    /// Maximum time to wait for the pong, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub timeout_ms: u64,
}
