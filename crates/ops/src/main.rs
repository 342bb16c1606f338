//! Operator CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use ops::{Cli, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::from_env().with_cli(&cli);
    ops::init_tracing(&config);

    match ops::execute(&cli.command, &config).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "command failed");
            let output = serde_json::json!({ "error": e.code(), "message": e.to_string() });
            eprintln!("{output:#}");
            ExitCode::FAILURE
        }
    }
}
