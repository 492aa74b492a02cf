// CLI entry point for the blackjack lobby server.
//
// Network settings come from the config file (key/value lines, forgiving),
// with `--ip` and `--port` overriding it. Logging goes through env_logger;
// run with RUST_LOG=info to watch the lobby traffic.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use blackjack_server::config;

#[derive(Parser, Debug)]
#[command(version, about = "Multi-lobby TCP server for two-player blackjack")]
struct Args {
    /// Bind address, overriding the config file
    #[arg(short = 'i', long)]
    ip: Option<IpAddr>,

    /// Listen port, overriding the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the key/value config file
    #[arg(short, long, default_value = "config.txt")]
    config: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut server_config = config::load_file(&args.config);
    if let Some(ip) = args.ip {
        server_config.bind_ip = ip;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }

    match blackjack_server::server::run(server_config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("server failed: {err}");
            ExitCode::FAILURE
        }
    }
}
