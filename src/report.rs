//! Configuration diagnostics.
//!
//! Components describe configuration problems (missing columns, invalid
//! parameters) by appending issues to a `CompatibilityReport` instead of
//! failing. Issues are grouped by nested scopes, e.g.
//! `Simulator -> Sesph -> CubicSpline`.

use std::error::Error;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    pub scope: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.scope, self.message)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompatibilityReport {
    scopes: Vec<String>,
    issues: Vec<Issue>,
}

impl CompatibilityReport {
    pub fn new() -> Self {
        CompatibilityReport::default()
    }

    pub fn begin_scope(&mut self, name: &str) {
        self.scopes.push(name.to_owned());
    }

    pub fn end_scope(&mut self) {
        debug_assert!(!self.scopes.is_empty(), "unbalanced end_scope");
        self.scopes.pop();
    }

    pub fn add_issue<S: Into<String>>(&mut self, message: S) {
        self.issues.push(Issue {
            scope: self.scopes.join(" -> "),
            message: message.into(),
        });
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn log_issues(&self) {
        for issue in &self.issues {
            log::error!("{}", issue);
        }
    }

    /// Turn a report with issues into an error.
    pub fn into_result(self) -> Result<(), ConfigurationError> {
        if self.has_issues() {
            Err(ConfigurationError {
                issues: self.issues,
            })
        } else {
            Ok(())
        }
    }
}

/// A configuration that cannot be simulated.
#[derive(Clone, Debug)]
pub struct ConfigurationError {
    issues: Vec<Issue>,
}

impl ConfigurationError {
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} configuration issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {}", issue)?;
        }
        Ok(())
    }
}

impl Error for ConfigurationError {}
