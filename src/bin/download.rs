use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rudp_ftp::Protocol;

/// Downloads a file from a reliable file-transfer server into DST_DIR.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(short = 'H', long)]
    host: String,

    #[arg(short, long)]
    port: u16,

    #[arg(short, long, help = "Directory to write the downloaded file into")]
    dst: PathBuf,

    #[arg(short, long, help = "Name of the file as stored on the server")]
    name: String,

    #[arg(long, default_value = "stop_and_wait")]
    protocol: Protocol,

    #[arg(short, long, help = "Increase verbosity to debug")]
    verbose: bool,

    #[arg(short, long, help = "Decrease verbosity to warnings only")]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = rudp_ftp::client::run_download(&args.host, args.port, &args.dst, &args.name, args.protocol);
    ExitCode::from(outcome.exit_code() as u8)
}
