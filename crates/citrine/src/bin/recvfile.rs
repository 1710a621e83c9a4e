use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;

use citrine_log::CitrineLogger;
use citrine_transport::{Receiver, TransferConfig};
use clap::Parser;
use clap::error::ErrorKind;
use log::{LevelFilter, error, info};

/// Receive one file from a sendfile peer and store it in the working
/// directory.
#[derive(Debug, Parser)]
#[command(name = "recvfile")]
struct Args {
    /// UDP port to listen on.
    #[arg(short = 'p', value_name = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    CitrineLogger::init(LevelFilter::Info).unwrap();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("[error] {e}");
            return ExitCode::from(1);
        }
    };

    let bind: SocketAddr = (Ipv4Addr::UNSPECIFIED, args.port).into();
    let receiver = match Receiver::bind(bind, TransferConfig::default()).await {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("[error] cannot bind port {}: {e}", args.port);
            return ExitCode::from(1);
        }
    };

    match receiver.run(Path::new(".")).await {
        Ok(path) => {
            info!("stored transfer as {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("[error] {e}");
            ExitCode::from(1)
        }
    }
}
