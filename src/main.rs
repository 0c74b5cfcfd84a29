use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match sehub_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sehub: {}", e);
            ExitCode::FAILURE
        }
    }
}
