// TempBridge - Serial temperature sensor to messaging bridge
use clap::Parser;
use tempbridge::cli::{execute_command, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = execute_command(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
