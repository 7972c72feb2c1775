//! Shell script builder for bundled remote commands
//!
//! A [`ShellScript`] is an ordered list of statements. Rendering appends
//! `echo exec_code=$?` after each statement so [`ExecResult`] can tell which
//! bundled statement failed.
//!
//! Statements are assembled from validated identifiers only (see
//! [`crate::site::descriptor`]); the builder never quotes or escapes on its
//! own.
//!
//! [`ExecResult`]: super::ExecResult

use super::result::EXEC_MARKER;

/// Ordered list of shell statements run in one exec call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellScript {
    statements: Vec<String>,
}

impl ShellScript {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement
    pub fn statement(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }

    /// Statements in execution order, without markers
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Number of statements (and therefore expected markers)
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// True when no statement has been added
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Render to a single `bash -c` command string
    pub fn render(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("{s}; echo {EXEC_MARKER}$?"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
