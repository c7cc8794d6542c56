use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rudp_ftp::Protocol;

/// Uploads a local file to a reliable file-transfer server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(short = 'H', long)]
    host: String,

    #[arg(short, long)]
    port: u16,

    #[arg(short, long, help = "Local file to send")]
    src: PathBuf,

    #[arg(short, long, help = "Name to store the file under on the server")]
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

    let outcome = rudp_ftp::client::run_upload(&args.host, args.port, &args.src, &args.name, args.protocol);
    ExitCode::from(outcome.exit_code() as u8)
}
