//! Severities, partial results and their composition
//!
//! Every check produces a [`Verdict`]: an ordered list of [`Partial`] results.
//! Verdicts from individual checks are concatenated (never re-ordered) into
//! the verdict of a whole verifier run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Severity of a single partial result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Check passed
    Ok,
    /// Check passed, but the operator should know something
    Warn,
    /// The targeted charm or check is not supported
    Unsupported,
    /// Check failed
    Fail,
}

impl Severity {
    /// Whether a partial with this severity keeps the verdict successful.
    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Ok | Self::Warn)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Unsupported => write!(f, "UNSUPPORTED"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Outcome produced by exactly one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partial {
    pub severity: Severity,
    pub message: String,
}

impl Partial {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Ordered composition of partial results
///
/// A verdict is successful when every partial is `OK` or `WARN`. An empty
/// verdict is successful, but renders as a diagnostic because a check that
/// reports nothing is almost always a bug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    partials: Vec<Partial>,
}

impl Verdict {
    /// Create an empty verdict
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verdict holding a single partial
    pub fn single(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            partials: vec![Partial::new(severity, message)],
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::single(Severity::Ok, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::single(Severity::Warn, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::single(Severity::Fail, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::single(Severity::Unsupported, message)
    }

    pub fn push(&mut self, partial: Partial) {
        self.partials.push(partial);
    }

    pub fn add_partial(&mut self, severity: Severity, message: impl Into<String>) {
        self.push(Partial::new(severity, message));
    }

    /// Concatenate two verdicts, keeping `self` first.
    pub fn combine(mut self, other: Verdict) -> Verdict {
        self.partials.extend(other.partials);
        self
    }

    pub fn partials(&self) -> &[Partial] {
        &self.partials
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// True iff no partial is `UNSUPPORTED` or `FAIL`.
    pub fn success(&self) -> bool {
        self.partials.iter().all(|p| p.severity.is_passing())
    }

    pub fn has_warnings(&self) -> bool {
        self.partials.iter().any(|p| p.severity == Severity::Warn)
    }

    /// Count partials of a given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.partials
            .iter()
            .filter(|p| p.severity == severity)
            .count()
    }

    /// One-line footer describing the overall outcome
    pub fn overall(&self) -> &'static str {
        if !self.success() {
            "Failed"
        } else if self.has_warnings() {
            "OK (Checks passed with warnings)"
        } else {
            "OK (All checks passed)"
        }
    }
}

impl Add for Verdict {
    type Output = Verdict;

    fn add(self, rhs: Verdict) -> Verdict {
        self.combine(rhs)
    }
}

impl AddAssign for Verdict {
    fn add_assign(&mut self, rhs: Verdict) {
        self.partials.extend(rhs.partials);
    }
}

impl FromIterator<Partial> for Verdict {
    fn from_iter<I: IntoIterator<Item = Partial>>(iter: I) -> Self {
        Self {
            partials: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partials.is_empty() {
            return writeln!(
                f,
                "No result or additional information. This may be a bug in the verifier."
            );
        }

        writeln!(f, "Checks:")?;
        for partial in &self.partials {
            writeln!(f, "{partial}")?;
        }
        writeln!(f)?;
        writeln!(f, "Result: {}", self.overall())
    }
}
