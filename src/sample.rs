//! The live sample ("current values") and its fixed schema.
//!
//! A [`Schema`] is declared once per run from configuration: an ordered list of
//! variables, each with a display title (CSV header, axis label) and a number
//! format (CSV cell). A [`Sample`] always holds one value per declared variable;
//! NaN stands for a reading that is unavailable or failed.

use crate::error::{AppResult, GalileoError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

/// Shared handle to the run's current values.
///
/// The measurement loop is the only writer; the shell and controller code read
/// it for display.
pub type SharedSample = Arc<RwLock<Sample>>;

/// How a value is rendered into a CSV cell.
///
/// Parsed from the Python-style specs used in experiment definitions:
/// `{}`, `{:d}`, `{:n}`, `{:.3f}`, `{:.6e}`, `{:E}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueFormat {
    /// Shortest round-trip representation
    Plain,
    /// Rounded to the nearest integer
    Integer,
    /// Fixed-point with the given number of decimals
    Fixed(usize),
    /// Scientific with the given mantissa precision and a lower-case `e`
    Scientific(usize),
    /// Scientific with an upper-case `E`
    ScientificUpper(usize),
}

const DEFAULT_PRECISION: usize = 6;

impl ValueFormat {
    /// Renders `value`. NaN and infinities render as `nan`, `inf`, `-inf`.
    pub fn format(&self, value: f64) -> String {
        if value.is_nan() {
            return "nan".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf" } else { "-inf" }.to_string();
        }
        match *self {
            ValueFormat::Plain => value.to_string(),
            ValueFormat::Integer => format!("{}", value.round() as i64),
            ValueFormat::Fixed(precision) => format!("{value:.precision$}"),
            ValueFormat::Scientific(precision) => scientific(value, precision, 'e'),
            ValueFormat::ScientificUpper(precision) => scientific(value, precision, 'E'),
        }
    }
}

/// Formats like `1.234500e+03`: signed exponent padded to two digits.
fn scientific(value: f64, precision: usize, marker: char) -> String {
    let rendered = format!("{value:.precision$e}");
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}{marker}{sign}{:02}", exponent.abs())
        }
        None => rendered,
    }
}

/// Compiled once; matches `{}`, `{:d}`, `{:.3f}`, `{:.6e}` and friends.
fn format_pattern() -> AppResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\{:?(?:\.(\d+))?([eEfdng]?)\}$"))
        .as_ref()
        .map_err(|e| GalileoError::Configuration(e.to_string()))
}

impl FromStr for ValueFormat {
    type Err = GalileoError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let captures = format_pattern()?.captures(spec.trim()).ok_or_else(|| {
            GalileoError::Configuration(format!("Unsupported format string '{spec}'"))
        })?;

        let precision = match captures.get(1) {
            Some(digits) => Some(digits.as_str().parse::<usize>().map_err(|e| {
                GalileoError::Configuration(format!("Bad precision in '{spec}': {e}"))
            })?),
            None => None,
        };
        let kind = captures.get(2).map_or("", |m| m.as_str());

        let format = match kind {
            "" | "g" => Self::Plain,
            "d" | "n" => Self::Integer,
            "f" => Self::Fixed(precision.unwrap_or(DEFAULT_PRECISION)),
            "e" => Self::Scientific(precision.unwrap_or(DEFAULT_PRECISION)),
            "E" => Self::ScientificUpper(precision.unwrap_or(DEFAULT_PRECISION)),
            other => {
                return Err(GalileoError::Configuration(format!(
                    "Unsupported format type '{other}' in '{spec}'"
                )))
            }
        };
        Ok(format)
    }
}

impl TryFrom<String> for ValueFormat {
    type Error = GalileoError;

    fn try_from(spec: String) -> Result<Self, Self::Error> {
        spec.parse()
    }
}

impl From<ValueFormat> for String {
    fn from(format: ValueFormat) -> Self {
        format.to_string()
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFormat::Plain => write!(f, "{{}}"),
            ValueFormat::Integer => write!(f, "{{:d}}"),
            ValueFormat::Fixed(p) => write!(f, "{{:.{p}f}}"),
            ValueFormat::Scientific(p) => write!(f, "{{:.{p}e}}"),
            ValueFormat::ScientificUpper(p) => write!(f, "{{:.{p}E}}"),
        }
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        ValueFormat::Plain
    }
}

/// One declared variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Short key (`T`, `H`, `X`, ...)
    pub name: String,
    /// Human-readable title, used for the CSV header and axis labels
    #[serde(default)]
    pub title: Option<String>,
    /// CSV cell format
    #[serde(default)]
    pub format: ValueFormat,
}

impl VariableSpec {
    /// Variable with the given name, no title and plain formatting.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            format: ValueFormat::Plain,
        }
    }

    /// Sets the display title.
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the CSV format.
    pub fn formatted(mut self, format: ValueFormat) -> Self {
        self.format = format;
        self
    }

    /// Display title, falling back to the short name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Ordered, immutable set of variables for one run.
#[derive(Debug)]
pub struct Schema {
    variables: Vec<VariableSpec>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Builds a schema; names must be unique and the list non-empty.
    pub fn new(variables: Vec<VariableSpec>) -> AppResult<Arc<Self>> {
        if variables.is_empty() {
            return Err(GalileoError::Configuration(
                "Sample schema must declare at least one variable".into(),
            ));
        }
        let mut index = HashMap::with_capacity(variables.len());
        for (i, var) in variables.iter().enumerate() {
            if var.name.trim().is_empty() {
                return Err(GalileoError::Configuration(
                    "Variable names cannot be empty".into(),
                ));
            }
            if index.insert(var.name.clone(), i).is_some() {
                return Err(GalileoError::Configuration(format!(
                    "Duplicate variable '{}'",
                    var.name
                )));
            }
        }
        Ok(Arc::new(Self { variables, index }))
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    /// Position of `name`, if declared.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// True if `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Spec for `name`, if declared.
    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.position(name).map(|i| &self.variables[i])
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Always false for a constructed schema.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Current values for every variable of a [`Schema`].
#[derive(Clone, Debug)]
pub struct Sample {
    schema: Arc<Schema>,
    values: Vec<f64>,
}

impl Sample {
    /// New sample with every value NaN.
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![f64::NAN; schema.len()];
        Self { schema, values }
    }

    /// The schema this sample follows.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Value of `name`, or `None` if it is not declared.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|i| self.values[i])
    }

    /// Writes `value` into `name`. Undeclared names are rejected so the
    /// key set can never drift from the schema.
    pub fn set(&mut self, name: &str, value: f64) -> AppResult<()> {
        let i = self
            .schema
            .position(name)
            .ok_or_else(|| GalileoError::UnknownVariable(name.to_string()))?;
        self.values[i] = value;
        Ok(())
    }

    /// Writes `value` only if `name` is declared; returns whether it was.
    ///
    /// Experiments use this for optional auxiliary channels a given rig may
    /// choose not to record.
    pub fn set_if_declared(&mut self, name: &str, value: f64) -> bool {
        match self.schema.position(name) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Values in schema order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// `(spec, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&VariableSpec, f64)> {
        self.schema
            .variables()
            .iter()
            .zip(self.values.iter().copied())
    }

    /// Cells formatted with each variable's format, in schema order.
    pub fn formatted_row(&self) -> Vec<String> {
        self.iter().map(|(spec, v)| spec.format.format(v)).collect()
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (spec, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{} = {}", spec.name, spec.format.format(value))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<Schema> {
        Schema::new(vec![
            VariableSpec::new("n").formatted(ValueFormat::Integer),
            VariableSpec::new("t").titled("t (s)").formatted(ValueFormat::Fixed(3)),
            VariableSpec::new("X").titled("X (V)").formatted(ValueFormat::Scientific(4)),
        ])
        .unwrap()
    }

    #[test]
    fn test_format_pattern_is_compiled_once() {
        let first = format_pattern().unwrap();
        let second = format_pattern().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!("{:.2f}".parse::<ValueFormat>().unwrap(), ValueFormat::Fixed(2));
    }

    #[test]
    fn test_new_sample_is_all_nan() {
        let sample = Sample::new(schema());
        assert_eq!(sample.values().len(), 3);
        assert!(sample.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_set_rejects_undeclared() {
        let mut sample = Sample::new(schema());
        sample.set("X", 1.5).unwrap();
        assert_eq!(sample.get("X"), Some(1.5));
        assert!(matches!(
            sample.set("Q", 1.0),
            Err(GalileoError::UnknownVariable(name)) if name == "Q"
        ));
        assert!(!sample.set_if_declared("Q", 1.0));
    }

    #[test]
    fn test_formatted_row() {
        let mut sample = Sample::new(schema());
        sample.set("n", 7.0).unwrap();
        sample.set("t", 1.23456).unwrap();
        assert_eq!(sample.formatted_row(), vec!["7", "1.235", "nan"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::new(vec![VariableSpec::new("T"), VariableSpec::new("T")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_python_format_specs() {
        assert_eq!("{}".parse::<ValueFormat>().unwrap(), ValueFormat::Plain);
        assert_eq!("{:d}".parse::<ValueFormat>().unwrap(), ValueFormat::Integer);
        assert_eq!("{:n}".parse::<ValueFormat>().unwrap(), ValueFormat::Integer);
        assert_eq!("{:.3f}".parse::<ValueFormat>().unwrap(), ValueFormat::Fixed(3));
        assert_eq!(
            "{:.6e}".parse::<ValueFormat>().unwrap(),
            ValueFormat::Scientific(6)
        );
        assert_eq!(
            "{:E}".parse::<ValueFormat>().unwrap(),
            ValueFormat::ScientificUpper(6)
        );
        assert!("{:x}".parse::<ValueFormat>().is_err());
        assert!("%.3f".parse::<ValueFormat>().is_err());
    }

    #[test]
    fn test_scientific_matches_python_layout() {
        assert_eq!(ValueFormat::Scientific(6).format(1234.5), "1.234500e+03");
        assert_eq!(ValueFormat::Scientific(2).format(-0.00012), "-1.20e-04");
        assert_eq!(ValueFormat::ScientificUpper(1).format(0.0), "0.0E+00");
    }

    #[test]
    fn test_format_round_trips_through_display() {
        for spec in ["{}", "{:d}", "{:.2f}", "{:.6e}", "{:.3E}"] {
            let format: ValueFormat = spec.parse().unwrap();
            assert_eq!(format.to_string().parse::<ValueFormat>().unwrap(), format);
        }
    }
}
