use std::path::PathBuf;
use std::process::ExitCode;

use citrine_log::CitrineLogger;
use citrine_transport::{TransferConfig, resolve_receiver, send_file};
use clap::Parser;
use clap::error::ErrorKind;
use log::{LevelFilter, error};

/// Send a file to a waiting recvfile peer over UDP.
#[derive(Debug, Parser)]
#[command(name = "sendfile")]
struct Args {
    /// Receiver endpoint as <host>:<port>.
    #[arg(short = 'r', value_name = "HOST:PORT")]
    receiver: String,

    /// File to transfer.
    #[arg(short = 'f', value_name = "FILE")]
    file: PathBuf,
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

    let receiver = match resolve_receiver(args.receiver.as_str()).await {
        Ok(addr) => addr,
        Err(e) => {
            error!("[error] {e}");
            return ExitCode::from(1);
        }
    };

    match send_file(&args.file, receiver, &TransferConfig::default()).await {
        Ok(stats) => {
            println!("[stats] running time: {} ms", stats.elapsed.as_millis());
            println!("[stats] file size: {} bytes", stats.file_size);
            println!("[stats] bytes sent: {} bytes", stats.total_bytes_sent);
            println!("[stats] efficiency: {:.2}%", stats.efficiency());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("[error] {e}");
            ExitCode::from(1)
        }
    }
}
