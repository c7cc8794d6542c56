use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Reliable file-transfer server: listens on HOST:PORT and serves uploads
/// and downloads out of STORAGE_DIR.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long)]
    port: u16,

    #[arg(short, long)]
    storage: PathBuf,

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

    let outcome = rudp_ftp::server::run(&args.host, args.port, &args.storage);
    ExitCode::from(outcome.exit_code() as u8)
}
