pub mod run;
pub mod tasks;
pub mod worker;

use std::process::ExitCode;

/// Clamp an outcome code into the process exit range.
pub fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}
