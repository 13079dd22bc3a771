//! Analyzer acquisition: marker read-out, swept traces, and peak search.
//!
//! Unlike verification, acquisition stops at the first failure: a half-read
//! marker set or trace is not a useful measurement.

use crate::command_set::{CommandSet, FieldSpec};
use std::sync::Arc;
use crate::error::{AppResult, VerifyError};
use crate::session::Session;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tolerance applied when verifying a marker position.
pub const MARKER_TOLERANCE_HZ: f64 = 1.0;

/// A marker placed at a fixed frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// Marker index as the analyzer numbers them (1-based).
    pub number: u8,
    /// Marker X position.
    pub frequency_hz: f64,
}

/// Markers to place before acquisition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerPlan {
    /// Markers in acquisition order.
    pub markers: Vec<Marker>,
}

impl MarkerPlan {
    /// Empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a marker.
    pub fn marker(mut self, number: u8, frequency_hz: f64) -> Self {
        self.markers.push(Marker {
            number,
            frequency_hz,
        });
        self
    }

    /// True if no markers are planned.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Copy of `set` with fields that switch each marker on and place it.
    ///
    /// The positions become the fields' defaults, so the regular configure and
    /// verify passes apply and check them.
    pub fn extend_command_set(&self, set: &CommandSet) -> CommandSet {
        let mut set = set.clone();
        for marker in &self.markers {
            let n = marker.number;
            set.fields.push(
                FieldSpec::switch(
                    &format!("marker{n}_state"),
                    &format!("CALC:MARK{n}:STAT {{value}}"),
                    &format!("CALC:MARK{n}:STAT?"),
                )
                .with_label(&format!("Marker {n}"))
                .with_default(true),
            );
            set.fields.push(
                FieldSpec::numeric(
                    &format!("marker{n}_x"),
                    &format!("CALC:MARK{n}:X {{value}}"),
                    &format!("CALC:MARK{n}:X?"),
                    MARKER_TOLERANCE_HZ,
                )
                .with_label(&format!("Marker {n} X"))
                .with_unit("Hz")
                .with_default(marker.frequency_hz),
            );
        }
        set
    }
}

/// One marker read-out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerReading {
    /// Marker index.
    pub marker: u8,
    /// Marker X.
    pub frequency_hz: f64,
    /// Marker Y.
    pub level_dbm: f64,
}

fn parse_reading(marker: u8, axis: &str, response: &str) -> AppResult<f64> {
    response.trim().parse().map_err(|_| {
        VerifyError::Acquisition(format!(
            "marker {marker} {axis}: unparseable response {response:?}"
        ))
    })
}

/// Trigger one sweep, wait for it, and read every planned marker.
pub async fn acquire_markers<T: Transport>(
    session: &mut Session<T>,
    plan: &MarkerPlan,
) -> AppResult<Vec<MarkerReading>> {
    session.send("INIT:IMM").await?;
    session.query("*OPC?").await?;

    let mut readings = Vec::with_capacity(plan.markers.len());
    for marker in &plan.markers {
        let n = marker.number;
        let x = session.query(&format!("CALC:MARK{n}:X?")).await?;
        let y = session.query(&format!("CALC:MARK{n}:Y?")).await?;
        let reading = MarkerReading {
            marker: n,
            frequency_hz: parse_reading(n, "X", &x)?,
            level_dbm: parse_reading(n, "Y", &y)?,
        };
        debug!(
            "Marker {}: {} Hz, {} dBm",
            reading.marker, reading.frequency_hz, reading.level_dbm
        );
        readings.push(reading);
    }
    Ok(readings)
}

/// One swept trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    /// Trace number that was read.
    pub number: u8,
    /// X samples.
    pub x: Vec<f64>,
    /// Y samples, same length as `x`.
    pub y: Vec<f64>,
    /// X axis unit.
    pub x_unit: String,
    /// Y axis unit.
    pub y_unit: String,
}

impl Trace {
    /// Highest point, if the trace has any valid sample.
    pub fn peak(&self) -> Option<Peak> {
        find_peak(&self.x, &self.y)
    }

    /// `"Peak -12.50 dBm @ 1550.100 nm"`, or `"No valid data"`.
    pub fn peak_summary(&self) -> String {
        match self.peak() {
            Some(peak) => format!(
                "Peak {:.2} {} @ {:.3} {}",
                peak.y, self.y_unit, peak.x, self.x_unit
            ),
            None => "No valid data".to_string(),
        }
    }
}

/// Parse a comma- or space-separated sample list.
///
/// A leading integer equal to the number of samples that follow is a count
/// prefix and is dropped.
fn parse_samples(axis: &str, response: &str) -> AppResult<Vec<f64>> {
    let mut samples = response
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                VerifyError::Acquisition(format!("trace {axis}: unparseable sample {token:?}"))
            })
        })
        .collect::<AppResult<Vec<f64>>>()?;
    if let Some(&first) = samples.first() {
        if samples.len() > 1 && first == (samples.len() - 1) as f64 {
            samples.remove(0);
        }
    }
    Ok(samples)
}

/// Run one sweep and read trace `number` back.
///
/// Fails if the session's command set has no trace commands, if the sweep
/// does not report completion with a positive number, or if the axes do not
/// line up.
pub async fn acquire_trace<T: Transport>(session: &mut Session<T>, number: u8) -> AppResult<Trace> {
    let set = Arc::clone(session.command_set());
    let commands = set.trace.as_ref().ok_or_else(|| {
        VerifyError::Acquisition(format!("command set '{}' has no trace commands", set.kind))
    })?;
    let mut vars = session.template_vars();
    vars.insert("trace".to_string(), number.to_string());

    if let Some(trigger) = &commands.trigger {
        session.send(&trigger.render(&vars)?).await?;
    }
    let complete = session.query(&commands.complete_query.render(&vars)?).await?;
    match complete.trim().parse::<f64>() {
        Ok(n) if n > 0.0 => {}
        _ => {
            return Err(VerifyError::Acquisition(format!(
                "sweep did not complete (reply {complete:?})"
            )))
        }
    }

    let x = parse_samples("X", &session.query(&commands.x_query.render(&vars)?).await?)?;
    let y = parse_samples("Y", &session.query(&commands.y_query.render(&vars)?).await?)?;
    if x.len() != y.len() {
        return Err(VerifyError::Acquisition(format!(
            "trace {number}: {} X samples but {} Y samples",
            x.len(),
            y.len()
        )));
    }
    debug!("Trace {}: {} points", number, x.len());
    Ok(Trace {
        number,
        x,
        y,
        x_unit: commands.x_unit.clone(),
        y_unit: commands.y_unit.clone(),
    })
}

/// Highest point of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Peak {
    /// X at the maximum.
    pub x: f64,
    /// Maximum Y.
    pub y: f64,
}

/// Maximum of `y` and its `x`. NaN samples are ignored; the first of equal
/// maxima wins. `None` for an empty (or all-NaN) trace.
pub fn find_peak(x: &[f64], y: &[f64]) -> Option<Peak> {
    x.iter()
        .zip(y)
        .filter(|(_, y)| !y.is_nan())
        .fold(None, |best: Option<Peak>, (&x, &y)| match best {
            Some(peak) if peak.y >= y => Some(peak),
            _ => Some(Peak { x, y }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_of_trace() {
        let x = [1550.0, 1550.1, 1550.2, 1550.3];
        let y = [-40.0, -12.5, -12.5, -30.0];
        assert_eq!(find_peak(&x, &y), Some(Peak { x: 1550.1, y: -12.5 }));
    }

    #[test]
    fn peak_skips_nan_and_handles_empty() {
        assert_eq!(find_peak(&[], &[]), None);
        assert_eq!(find_peak(&[1.0, 2.0], &[f64::NAN, f64::NAN]), None);
        assert_eq!(
            find_peak(&[1.0, 2.0, 3.0], &[f64::NAN, -3.0, -7.0]),
            Some(Peak { x: 2.0, y: -3.0 })
        );
    }

    #[test]
    fn samples_drop_count_prefix() {
        assert_eq!(parse_samples("Y", "3 -40.0 -12.5 -30.0").unwrap(), vec![-40.0, -12.5, -30.0]);
        assert_eq!(parse_samples("Y", "-40.0,-12.5,-30.0").unwrap(), vec![-40.0, -12.5, -30.0]);
        assert_eq!(parse_samples("X", "").unwrap(), Vec::<f64>::new());
        assert!(parse_samples("X", "1550.0,oops").is_err());
    }

    #[test]
    fn peak_summary_formats_units() {
        let trace = Trace {
            number: 1,
            x: vec![1550.0, 1550.1],
            y: vec![-40.0, -12.5],
            x_unit: "nm".to_string(),
            y_unit: "dBm".to_string(),
        };
        assert_eq!(trace.peak_summary(), "Peak -12.50 dBm @ 1550.100 nm");
        let empty = Trace {
            x: Vec::new(),
            y: Vec::new(),
            ..trace
        };
        assert_eq!(empty.peak_summary(), "No valid data");
    }

    #[test]
    fn plan_adds_marker_fields() {
        let plan = MarkerPlan::new().marker(1, 1.0e9).marker(2, 1.001e9);
        let set = plan.extend_command_set(&crate::command_set::catalog::fsv30());
        set.validate().unwrap();
        let x = set.find_field("marker2_x").unwrap();
        assert_eq!(x.set_command.as_ref().map(|t| t.as_str()), Some("CALC:MARK2:X {value}"));
        assert_eq!(x.comparator.tolerance(), Some(MARKER_TOLERANCE_HZ));
        assert!(set.find_field("marker1_state").is_some());
    }
}
