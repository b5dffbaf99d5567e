//! External command execution utilities.
//!
//! Provides macros and functions for running the generator, the package
//! manager and git with proper output handling and error reporting.
//!
//! Commands started with a `lease=` argument are polled instead of waited on:
//! when the run is cancelled the child is killed and
//! [`StageError::Cancelled`](crate::pipeline::StageError) is returned.

use crate::{log, pipeline::RunLease};
use anyhow::{Context, Result};
use regex::Regex;
use std::{
    ffi::OsString,
    io::Read,
    path::Path,
    process::{Child, Command, Output, Stdio},
    sync::OnceLock,
    thread,
    time::Duration,
};

/// How often a running child is checked against its lease.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Macros
// ============================================================================

/// Run an external command with arguments.
///
/// Supports optional `lease` and `filter` arguments.
///
/// # Examples
/// ```ignore
/// // Without working directory
/// exec!(["git"]; "status", "-s")?;
///
/// // With working directory
/// exec!(root; ["git"]; "push", "origin", branch)?;
///
/// // Cancellable, with custom filter
/// exec!(lease=&lease; filter=&NPM_FILTER; root; &config.build.install;)?;
/// ```
#[macro_export]
macro_rules! exec {
    ($($tt:tt)*) => {
        $crate::exec_internal!(@parse_lease $($tt)*)
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! exec_internal {
    // Parse lease argument
    (@parse_lease lease=$lease:expr; $($rest:tt)*) => {
        $crate::exec_internal!(@parse_filter Some($lease); $($rest)*)
    };
    (@parse_lease $($rest:tt)*) => {
        $crate::exec_internal!(@parse_filter None; $($rest)*)
    };

    // Parse filter argument
    (@parse_filter $lease:expr; filter=$filter:expr; $($rest:tt)*) => {
        $crate::exec_internal!(@parse_root $lease; $filter; $($rest)*)
    };
    (@parse_filter $lease:expr; $($rest:tt)*) => {
        $crate::exec_internal!(@parse_root $lease; &$crate::utils::exec::EMPTY_FILTER; $($rest)*)
    };

    // Parse root and command (with root)
    (@parse_root $lease:expr; $filter:expr; $root:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            Some($root),
            &$crate::utils::exec::internal::to_cmd_vec($cmd),
            &$crate::utils::exec::internal::filter_args(&[$($crate::utils::exec::internal::to_os($arg)),*]),
            $filter,
            $lease,
        )
    };
    // Parse command (without root)
    (@parse_root $lease:expr; $filter:expr; $cmd:expr; $($arg:expr),* $(,)?) => {
        $crate::utils::exec::exec(
            None,
            &$crate::utils::exec::internal::to_cmd_vec($cmd),
            &$crate::utils::exec::internal::filter_args(&[$($crate::utils::exec::internal::to_os($arg)),*]),
            $filter,
            $lease,
        )
    };
}

// ============================================================================
// Argument Conversion
// ============================================================================

#[doc(hidden)]
pub mod internal {
    use std::ffi::OsString;

    /// Convert to `OsString`.
    #[inline]
    pub fn to_os<S: Into<OsString>>(s: S) -> OsString {
        s.into()
    }

    /// Trait for converting to command vector.
    pub trait ToCmd {
        fn to_cmd(self) -> Vec<OsString>;
    }

    impl<const N: usize> ToCmd for [&str; N] {
        #[inline]
        fn to_cmd(self) -> Vec<OsString> {
            self.into_iter().map(OsString::from).collect()
        }
    }

    impl ToCmd for &[String] {
        #[inline]
        fn to_cmd(self) -> Vec<OsString> {
            self.iter().map(OsString::from).collect()
        }
    }

    impl ToCmd for &Vec<String> {
        #[inline]
        fn to_cmd(self) -> Vec<OsString> {
            self.iter().map(OsString::from).collect()
        }
    }

    /// Convert command to `Vec<OsString>`.
    #[inline]
    pub fn to_cmd_vec<C: ToCmd>(cmd: C) -> Vec<OsString> {
        cmd.to_cmd()
    }

    /// Filter out empty args.
    #[inline]
    pub fn filter_args(args: &[OsString]) -> Vec<OsString> {
        args.iter().filter(|a| !a.is_empty()).cloned().collect()
    }
}

// ============================================================================
// Command Execution
// ============================================================================

/// Execute a command and capture its output.
///
/// # Errors
/// Returns error if the command fails to start, exits non-zero, or the
/// lease reports the run as cancelled while it is running.
pub fn exec(
    root: Option<&Path>,
    cmd: &[OsString],
    args: &[OsString],
    filter: &'static FilterRule,
    lease: Option<&RunLease>,
) -> Result<Output> {
    let (name, mut command) = prepare(root, cmd, args)?;

    let output = match lease {
        None => command
            .output()
            .with_context(|| format!("Failed to execute `{name}`"))?,
        Some(lease) => {
            lease.check()?;
            let child = command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("Failed to execute `{name}`"))?;
            wait_cancellable(child, lease)?
        }
    };

    log_output(&name, &output, filter)?;
    Ok(output)
}

/// Poll the child until it exits, killing it if the run is cancelled.
///
/// Both pipes are drained on their own threads; a child filling a pipe
/// buffer nobody reads would otherwise never exit.
fn wait_cancellable(mut child: Child, lease: &RunLease) -> Result<Output> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Err(cancelled) = lease.check() {
            child.kill().ok();
            child.wait().ok();
            return Err(cancelled.into());
        }
        thread::sleep(POLL_INTERVAL);
    };

    let join = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle.and_then(|h| h.join().ok()).unwrap_or_default()
    };

    Ok(Output {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Prepare a Command from components.
fn prepare(root: Option<&Path>, cmd: &[OsString], args: &[OsString]) -> Result<(String, Command)> {
    let name = cmd
        .first()
        .and_then(|s| s.to_str())
        .context("Empty command")?
        .to_owned();

    let mut command = Command::new(&cmd[0]);
    command.args(&cmd[1..]).args(args);
    // Runs are unattended: a refused credential must fail, not wait on a tty
    command.env("GIT_TERMINAL_PROMPT", "0");

    if let Some(dir) = root {
        command.current_dir(dir);
    }

    Ok((name, command))
}

// ============================================================================
// Output Filtering
// ============================================================================

fn strip_ansi(s: &str) -> std::borrow::Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    re.replace_all(s, "")
}

/// Filter rule for skipping known noise in command output.
pub struct FilterRule {
    /// Prefixes to match at the start of output lines.
    pub skip_prefixes: &'static [&'static str],
}

impl FilterRule {
    pub const fn new(skip_prefixes: &'static [&'static str]) -> Self {
        Self { skip_prefixes }
    }

    fn should_skip(&self, output: &str) -> bool {
        output.is_empty() || self.skip_prefixes.iter().any(|p| output.starts_with(p))
    }

    /// Lines of `output` that survive the filter, ANSI codes stripped.
    fn kept_lines(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .map(|line| strip_ansi(line).trim().to_owned())
            .filter(|line| !self.should_skip(line))
            .collect()
    }

    fn log(&self, name: &str, output: &str) {
        let lines = self.kept_lines(output);
        if !lines.is_empty() {
            log!(name; "{}", lines.join("\n"));
        }
    }
}

/// Stdout filter: skip HTML and JSON output.
const STDOUT_FILTER: FilterRule = FilterRule::new(&["<!DOCTYPE", "{"]);

/// Empty filter (no skipping).
pub const EMPTY_FILTER: FilterRule = FilterRule::new(&[]);

/// Package manager chatter that is not worth a log line.
pub const NPM_FILTER: FilterRule = FilterRule::new(&["npm WARN", "npm notice", "npm warn"]);

/// Git progress lines written to stderr on success.
pub const GIT_FILTER: FilterRule =
    FilterRule::new(&["To ", "remote:", "Enumerating", "Counting", "Compressing", "Writing", "Total", "Cloning", "done."]);

/// Log command output, filtering known noise.
fn log_output(name: &str, output: &Output, filter: &'static FilterRule) -> Result<()> {
    if !output.status.success() {
        anyhow::bail!(format_error(name, output, filter));
    }

    // On success, only log stderr (warnings) to reduce noise
    let stderr = String::from_utf8_lossy(&output.stderr);
    filter.log(name, stderr.trim());

    Ok(())
}

/// Format command error message with filtering.
fn format_error(name: &str, output: &Output, filter: &'static FilterRule) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let mut msg = format!("Command `{name}` failed with {}\n", output.status);
    let error_lines = filter.kept_lines(&stderr);
    if !error_lines.is_empty() {
        msg.push_str(&error_lines.join("\n"));
    }

    let stdout = strip_ansi(stdout.trim()).into_owned();
    if !stdout.is_empty() && !STDOUT_FILTER.should_skip(&stdout) {
        msg.push_str("\nStdout:\n");
        msg.push_str(&stdout);
    }
    msg
}

// ============================================================================
// Tests
// ============================================================================
