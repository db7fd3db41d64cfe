use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match toolbridge::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
