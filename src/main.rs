use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match jobfill::app::run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("jobfill: {err}");
            ExitCode::FAILURE
        }
    }
}
