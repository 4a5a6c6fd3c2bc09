// Entrypoint for the uploader.
// - Keeps `main` small: parse the positional arguments, build a client
//   from the environment and hand the request to it.
// - Prints the bare message id on success; any failure is one line on
//   stderr and exit code 1.

use clap::error::ErrorKind;
use clap::Parser;
use std::process::ExitCode;
use tg_uploader::{cli::Cli, logging::init_tracing, UploadClient};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            eprint!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing();

    match run(cli) {
        Ok(message_id) => {
            println!("{}", message_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error uploading file: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i64> {
    let client = UploadClient::from_env()?;
    let result = client.upload(&cli.into_request())?;
    Ok(result.message_id)
}
