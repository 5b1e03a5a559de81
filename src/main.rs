use std::process::ExitCode;

fn main() -> ExitCode {
    focus_engine::run()
}
