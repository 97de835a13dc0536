// ringlog-send: append a command or position a read, print what the server returns
use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ringlog_client::RinglogClient;
use ringlog_core::{parse_flexible_u64, to_exit_code, Error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the ringlogd server.
    #[arg(long, default_value = "127.0.0.1:9000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one line and print the whole log.
    Send { line: String },
    /// Print the log starting inside entry SEQ at byte OFFSET.
    Seek {
        #[arg(value_parser = parse_operand)]
        seq: u64,
        #[arg(value_parser = parse_operand)]
        offset: u64,
    },
}

fn parse_operand(text: &str) -> Result<u64, String> {
    parse_flexible_u64(text).map_err(|err| err.to_string())
}

fn run(cli: Cli) -> Result<(), Error> {
    let client = RinglogClient::connect(&cli.server)?;
    let reply = match cli.command {
        Command::Send { line } => client.send_command(line.as_bytes())?,
        Command::Seek { seq, offset } => client.seek(seq, offset)?,
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&reply)?;
    stdout.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ringlog-send: {err}");
            ExitCode::from(to_exit_code(err.kind()) as u8)
        }
    }
}
