//! Evaluation of captured remote command output
//!
//! Every statement of a remote script is followed by `echo exec_code=$?`, so a
//! single exec call that bundles several statements reports one marker line
//! per statement. A result is only successful when the exec channel itself
//! worked and every marker reports `0`.
//!
//! A statement whose output lacks a trailing newline pushes its marker into
//! the middle of a line, so markers are matched anywhere within a line.

use crate::Error;

/// Prefix of the per-statement completion marker
pub const EXEC_MARKER: &str = "exec_code=";

/// Captured output of one remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Trimmed stdout of the remote shell
    pub stdout: String,
    /// Trimmed stderr of the remote shell
    pub stderr: String,
    /// Connection, auth, stream or timeout failure
    pub transport_error: Option<String>,
}

/// First marker that reported a non-zero code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedMarker {
    /// Zero-based index of the statement among all markers
    pub index: usize,
    /// Raw code text after `exec_code=`
    pub code: String,
}

impl ExecResult {
    /// Result of a command that ran to completion
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            transport_error: None,
        }
    }

    /// Result of a command whose exec channel failed
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            transport_error: Some(error.into()),
        }
    }

    /// True when no transport error occurred and every marker reports `0`
    pub fn is_ok(&self) -> bool {
        self.transport_error.is_none() && self.failed_marker().is_none()
    }

    /// Exit codes reported by each marker line, in order
    pub fn marker_codes(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .filter_map(|line| line.find(EXEC_MARKER).map(|at| &line[at + EXEC_MARKER.len()..]))
            .map(str::trim)
    }

    /// The first marker that reported anything other than `0`
    pub fn failed_marker(&self) -> Option<FailedMarker> {
        self.marker_codes()
            .enumerate()
            .find(|(_, code)| *code != "0")
            .map(|(index, code)| FailedMarker {
                index,
                code: code.to_string(),
            })
    }

    /// Convert into a step outcome for a script of `expected` statements.
    ///
    /// The error carries stderr verbatim when the remote side printed
    /// anything, otherwise a description of the failing marker. Output that
    /// stops short of `expected` markers is a failure even when every marker
    /// seen reports `0`.
    pub fn check(&self, step: &str, expected: usize) -> Result<(), Error> {
        if let Some(err) = &self.transport_error {
            return Err(Error::transport(err.clone()));
        }

        match self.failed_marker() {
            None => {
                let reported = self.marker_codes().count();
                if reported < expected {
                    return Err(Error::remote_command(
                        step,
                        format!("output ended after {reported} of {expected} statements"),
                    ));
                }
                Ok(())
            }
            Some(marker) => {
                let message = if self.stderr.is_empty() {
                    format!(
                        "statement {} exited with code {}",
                        marker.index + 1,
                        marker.code
                    )
                } else {
                    self.stderr.clone()
                };
                Err(Error::remote_command(step, message))
            }
        }
    }
}
