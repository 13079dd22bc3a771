//! Verification reports.
//!
//! A [`VerificationReport`] is produced fresh by every verify pass and never
//! changes afterwards. It renders to the line format operators read on the
//! console:
//!
//! ```text
//! Frequency: current 1000.2 Hz, expected 1000 Hz -> OK
//! Output: query failed (query "OUTP1:STAT?" failed: timed out after 5s)
//! SYST:ERR?: 0,"No error"
//! ```

use serde::Serialize;
use std::fmt;

/// Outcome for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticLine {
    /// Field name from the command set.
    pub field_name: String,
    /// Human label.
    pub label: String,
    /// Rendered read-back value; `None` when the query failed.
    pub actual: Option<String>,
    /// Rendered expected value; `None` when nothing was configured.
    pub expected: Option<String>,
    /// Whether this field matched.
    pub passed: bool,
    /// Failure cause for lines that could not be compared.
    pub note: Option<String>,
}

impl DiagnosticLine {
    /// Line for a completed comparison.
    pub fn compared(field_name: &str, label: &str, actual: String, expected: String, passed: bool) -> Self {
        Self {
            field_name: field_name.to_string(),
            label: label.to_string(),
            actual: Some(actual),
            expected: Some(expected),
            passed,
            note: None,
        }
    }

    /// Failing line for a field that could not be read or compared.
    pub fn failed(field_name: &str, label: &str, expected: Option<String>, note: String) -> Self {
        Self {
            field_name: field_name.to_string(),
            label: label.to_string(),
            actual: None,
            expected,
            passed: false,
            note: Some(note),
        }
    }

    /// `"<label>: current <v>, expected <v> -> OK|NG"`, or
    /// `"<label>: <note>"` when the comparison did not happen.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DiagnosticLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.actual, &self.expected, &self.note) {
            (Some(actual), Some(expected), _) => write!(
                f,
                "{}: current {}, expected {} -> {}",
                self.label,
                actual,
                expected,
                if self.passed { "OK" } else { "NG" }
            ),
            (_, _, Some(note)) => write!(f, "{}: {}", self.label, note),
            _ => write!(f, "{}: NG", self.label),
        }
    }
}

/// Result of one verify pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    overall_passed: bool,
    lines: Vec<DiagnosticLine>,
    error_query: Option<String>,
    error_query_result: Option<String>,
    transport_failures: Vec<String>,
}

impl VerificationReport {
    /// True iff every line passed, no transport call failed, and the error
    /// queue (if queried) reported no error.
    pub fn overall_passed(&self) -> bool {
        self.overall_passed
    }

    /// One line per field, in command-set order.
    pub fn lines(&self) -> &[DiagnosticLine] {
        &self.lines
    }

    /// Line for `field_name`.
    pub fn line(&self, field_name: &str) -> Option<&DiagnosticLine> {
        self.lines.iter().find(|l| l.field_name == field_name)
    }

    /// Lines that did not pass.
    pub fn failed_lines(&self) -> impl Iterator<Item = &DiagnosticLine> {
        self.lines.iter().filter(|l| !l.passed)
    }

    /// Raw error-queue response, if the command set has an error query and it answered.
    pub fn error_query_result(&self) -> Option<&str> {
        self.error_query_result.as_deref()
    }

    /// True if any send or query failed during the pass.
    pub fn transport_failed(&self) -> bool {
        !self.transport_failures.is_empty()
    }

    /// Rendered transport failures, in the order they happened.
    pub fn transport_failures(&self) -> &[String] {
        &self.transport_failures
    }

    /// Every console line: field lines, then the error-queue line.
    pub fn render_lines(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lines.iter().map(DiagnosticLine::render).collect();
        if let Some(query) = &self.error_query {
            match &self.error_query_result {
                Some(result) => out.push(format!("{query}: {result}")),
                None => out.push(format!("{query}: query failed")),
            }
        }
        out
    }

    /// `PASS (6/6 fields)` or `NG (5/6 fields)`.
    pub fn summary(&self) -> String {
        let passed = self.lines.iter().filter(|l| l.passed).count();
        format!(
            "{} ({}/{} fields)",
            if self.overall_passed { "PASS" } else { "NG" },
            passed,
            self.lines.len()
        )
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.render_lines() {
            writeln!(f, "{line}")?;
        }
        write!(f, "{}", self.summary())
    }
}

/// Accumulates a report during a verify pass.
#[derive(Debug, Default)]
pub(crate) struct ReportBuilder {
    lines: Vec<DiagnosticLine>,
    error_query: Option<String>,
    error_query_result: Option<String>,
    error_reported: bool,
    transport_failures: Vec<String>,
}

impl ReportBuilder {
    pub(crate) fn line(&mut self, line: DiagnosticLine) {
        self.lines.push(line);
    }

    pub(crate) fn transport_failure(&mut self, failure: String) {
        self.transport_failures.push(failure);
    }

    /// Record the error-queue exchange. `result` is `None` when the query failed.
    pub(crate) fn error_queue(&mut self, query: String, result: Option<String>, no_error: bool) {
        self.error_query = Some(query);
        self.error_query_result = result;
        self.error_reported = !no_error;
    }

    pub(crate) fn finish(self) -> VerificationReport {
        let overall_passed = self.lines.iter().all(|l| l.passed)
            && self.transport_failures.is_empty()
            && !self.error_reported;
        VerificationReport {
            overall_passed,
            lines: self.lines,
            error_query: self.error_query,
            error_query_result: self.error_query_result,
            transport_failures: self.transport_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_line(name: &str) -> DiagnosticLine {
        DiagnosticLine::compared(name, name, "1".into(), "1".into(), true)
    }

    #[test]
    fn renders_operator_lines() {
        let line = DiagnosticLine::compared(
            "frequency_hz",
            "Frequency",
            "1000.2 Hz".into(),
            "1000 Hz".into(),
            true,
        );
        assert_eq!(line.render(), "Frequency: current 1000.2 Hz, expected 1000 Hz -> OK");

        let failed = DiagnosticLine::failed(
            "output_enabled",
            "Output",
            Some("1".into()),
            "query failed (timed out)".into(),
        );
        assert_eq!(failed.render(), "Output: query failed (timed out)");
    }

    #[test]
    fn error_queue_forces_failure() {
        let mut builder = ReportBuilder::default();
        builder.line(ok_line("a"));
        builder.error_queue("SYST:ERR?".into(), Some("-222,\"Data out of range\"".into()), false);
        let report = builder.finish();
        assert!(!report.overall_passed());
        assert_eq!(
            report.render_lines().last().map(String::as_str),
            Some("SYST:ERR?: -222,\"Data out of range\"")
        );
    }

    #[test]
    fn transport_failure_forces_failure() {
        let mut builder = ReportBuilder::default();
        builder.line(ok_line("a"));
        builder.transport_failure("send \"INST:SEL P6V\" failed: not connected".into());
        let report = builder.finish();
        assert!(!report.overall_passed());
        assert!(report.transport_failed());
    }

    #[test]
    fn all_ok_passes_with_summary() {
        let mut builder = ReportBuilder::default();
        builder.line(ok_line("a"));
        builder.line(ok_line("b"));
        let report = builder.finish();
        assert!(report.overall_passed());
        assert_eq!(report.summary(), "PASS (2/2 fields)");
        assert_eq!(report.render_lines().len(), 2);
    }
}
