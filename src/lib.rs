pub mod blast;
pub mod formatdb;

use std::error::Error;
use std::path::Path;
use std::process::Command;

use log::debug;

/// Everything an external tool invocation left behind: the exit code and
/// both captured output streams.
#[derive(Debug)]
pub struct ToolOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run an external tool synchronously in the given working directory,
/// capturing stdout, stderr and the exit code.
///
/// Failing to start the program at all (e.g. it is not installed) is an
/// error, as is termination by a signal. A non-zero exit code is not: the
/// code is recorded in the outcome and it is up to the caller to decide
/// what a failure means for the tool it is wrapping.
pub fn run_tool(
    program: &str,
    args: &[&str],
    working_dir: &Path,
) -> Result<ToolOutcome, Box<dyn Error>> {
    debug!(
        "Running {} with arguments {:?} in {:?}",
        program, args, working_dir
    );
    let output = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .output()
        .map_err(|e| format!("Failed to run {}: {}", program, e))?;
    let exit_code = match output.status.code() {
        Some(code) => code,
        None => return Err(format!("{} was terminated by a signal", program).into()),
    };
    let outcome = ToolOutcome {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    debug!("{} finished with exit code {}", program, outcome.exit_code);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_stderr_and_exit_code() {
        let outcome = run_tool("sh", &["-c", "printf out; printf err >&2"], Path::new(".")).unwrap();
        assert_eq!(0, outcome.exit_code);
        assert!(outcome.success());
        assert_eq!("out", outcome.stdout);
        assert_eq!("err", outcome.stderr);
    }

    #[test]
    fn test_nonzero_exit_is_an_outcome_not_an_error() {
        let outcome = run_tool("sh", &["-c", "exit 4"], Path::new(".")).unwrap();
        assert_eq!(4, outcome.exit_code);
        assert!(!outcome.success());
    }

    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        run_tool("sh", &["-c", "touch marker"], dir.path()).unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let res = run_tool("definitely-not-a-real-tool-7f3a", &[], Path::new("."));
        assert!(res.is_err());
    }
}
