use std::process::ExitCode;

#[cfg(feature = "cli")]
mod cli;

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() -> ExitCode {
    eprintln!("fuzzy-catalog was built without the `cli` feature.");
    ExitCode::FAILURE
}
