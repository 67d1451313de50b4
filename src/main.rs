use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(err) = hiergraph::app::run() {
        eprintln!("hier: {err}");
        return ExitCode::from(err.exit_code());
    }
    ExitCode::SUCCESS
}
