//! Domain types for Tally metrics.
//!
//! A [`Metric`] is identified by its name and [`MetricKind`]; the same name
//! may exist independently as a counter and as a gauge. Metrics can only be
//! built through validating constructors, so a `Metric` value always has a
//! well-formed name and a payload that matches its kind.
//!
//! [`MetricDto`] is the JSON wire and snapshot representation:
//! `{"id": ..., "type": ..., "delta"?: ..., "value"?: ...}`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Letter first, then up to 127 ASCII word characters.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,127}$").expect("valid name pattern"));

/// Check a metric name against the accepted pattern.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

// ── Kind ───────────────────────────────────────────────────────────

/// The aggregation behavior of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Running sum of submitted deltas.
    Counter,
    /// Last submitted value wins.
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(StateError::InvalidKind(other.to_string())),
        }
    }
}

// ── Key ────────────────────────────────────────────────────────────

/// Identity of a stored metric: `(id, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub id: String,
    pub kind: MetricKind,
}

impl MetricKey {
    /// Build a key after validating the name.
    pub fn new(id: impl Into<String>, kind: MetricKind) -> StateResult<Self> {
        let id = id.into();
        if !is_valid_name(&id) {
            return Err(StateError::InvalidName(id));
        }
        Ok(Self { id, kind })
    }

    /// Parse a key from raw `kind` and `name` strings (path segments).
    pub fn parse(kind: &str, name: &str) -> StateResult<Self> {
        let kind = kind.parse()?;
        Self::new(name, kind)
    }

    pub fn counter(id: &str) -> StateResult<Self> {
        Self::new(id, MetricKind::Counter)
    }

    pub fn gauge(id: &str) -> StateResult<Self> {
        Self::new(id, MetricKind::Gauge)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// ── Metric ─────────────────────────────────────────────────────────

/// Stored payload. The variant is the metric's kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// A validated metric sample or stored aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    id: String,
    value: MetricValue,
}

impl Metric {
    /// Build a counter increment. Negative deltas are rejected.
    pub fn counter(id: impl Into<String>, delta: i64) -> StateResult<Self> {
        let id = validated_name(id.into())?;
        if delta < 0 {
            return Err(StateError::NegativeDelta(id));
        }
        Ok(Self {
            id,
            value: MetricValue::Counter(delta),
        })
    }

    /// Build a gauge measurement. Non-finite values cannot be encoded on
    /// the wire and are rejected.
    pub fn gauge(id: impl Into<String>, value: f64) -> StateResult<Self> {
        let id = validated_name(id.into())?;
        if !value.is_finite() {
            return Err(StateError::InvalidValue {
                kind: MetricKind::Gauge,
                raw: value.to_string(),
            });
        }
        Ok(Self {
            id,
            value: MetricValue::Gauge(value),
        })
    }

    /// Parse the path form `/{kind}/{name}/{value}`.
    ///
    /// Counter values must be integers; gauge values any float literal.
    pub fn parse(kind: &str, name: &str, raw: &str) -> StateResult<Self> {
        let kind: MetricKind = kind.parse()?;
        let invalid = || StateError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Counter => {
                let delta = raw.parse::<i64>().map_err(|_| invalid())?;
                Self::counter(name, delta)
            }
            MetricKind::Gauge => {
                let value = raw.parse::<f64>().map_err(|_| invalid())?;
                Self::gauge(name, value)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn value(&self) -> MetricValue {
        self.value
    }

    pub fn key(&self) -> MetricKey {
        MetricKey {
            id: self.id.clone(),
            kind: self.kind(),
        }
    }

    /// Counter delta, `None` for gauges.
    pub fn delta(&self) -> Option<i64> {
        match self.value {
            MetricValue::Counter(d) => Some(d),
            MetricValue::Gauge(_) => None,
        }
    }

    /// Gauge value, `None` for counters.
    pub fn gauge_value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Gauge(v) => Some(v),
            MetricValue::Counter(_) => None,
        }
    }

    /// Plain-text rendering used by `GET /value/{kind}/{name}`: integers
    /// for counters, `%g` with the shortest exact digits for gauges.
    pub fn display_value(&self) -> String {
        match self.value {
            MetricValue::Counter(d) => d.to_string(),
            MetricValue::Gauge(v) => format_g(v),
        }
    }

    /// Rebuild a metric from its key and a stored payload.
    pub(crate) fn from_parts(key: &MetricKey, value: MetricValue) -> Self {
        Self {
            id: key.id.clone(),
            value,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} = {}", self.kind(), self.id, self.display_value())
    }
}

/// `%g` without a precision: plain decimal while the exponent is in
/// `[-4, 6)`, otherwise `d.ddde±XX` with at least two exponent digits.
fn format_g(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return v.to_string();
    }
    let sci = format!("{v:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return v.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return v.to_string();
    };
    if (-4..6).contains(&exp) {
        v.to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.unsigned_abs())
    }
}

fn validated_name(id: String) -> StateResult<String> {
    if is_valid_name(&id) {
        Ok(id)
    } else {
        Err(StateError::InvalidName(id))
    }
}

// ── Wire DTO ───────────────────────────────────────────────────────

/// JSON representation shared by the HTTP API, the agent, and the
/// JSON snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDto {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricDto {
    /// Validate the DTO and convert it into a [`Metric`].
    ///
    /// The payload field must match the declared kind and the other field
    /// must be absent.
    pub fn into_metric(self) -> StateResult<Metric> {
        let kind: MetricKind = self.kind.parse()?;
        if !is_valid_name(&self.id) {
            return Err(StateError::InvalidName(self.id));
        }
        match (kind, self.delta, self.value) {
            (MetricKind::Counter, Some(delta), None) => Metric::counter(self.id, delta),
            (MetricKind::Gauge, None, Some(value)) => Metric::gauge(self.id, value),
            (MetricKind::Counter, None, _) => Err(StateError::MissingValue {
                id: self.id,
                kind,
                field: "delta",
            }),
            (MetricKind::Gauge, _, None) => Err(StateError::MissingValue {
                id: self.id,
                kind,
                field: "value",
            }),
            (MetricKind::Counter, Some(_), Some(_)) => Err(StateError::UnexpectedValue {
                id: self.id,
                kind,
                field: "value",
            }),
            (MetricKind::Gauge, Some(_), Some(_)) => Err(StateError::UnexpectedValue {
                id: self.id,
                kind,
                field: "delta",
            }),
        }
    }

    /// Validate only the identity part (`id`, `type`), as used by lookups.
    pub fn key(&self) -> StateResult<MetricKey> {
        MetricKey::parse(&self.kind, &self.id)
    }
}

impl From<&Metric> for MetricDto {
    fn from(metric: &Metric) -> Self {
        Self {
            id: metric.id.clone(),
            kind: metric.kind().as_str().to_string(),
            delta: metric.delta(),
            value: metric.gauge_value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pattern() {
        assert!(is_valid_name("hits"));
        assert!(is_valid_name("Alloc"));
        assert!(is_valid_name("a_1"));
        assert!(is_valid_name(&format!("a{}", "b".repeat(127))));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name("_abc"));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name("héllo"));
        assert!(!is_valid_name(&format!("a{}", "b".repeat(128))));
    }

    #[test]
    fn bad_names_rejected_for_both_kinds() {
        for name in ["9lives", "a/b", ""] {
            assert!(matches!(
                Metric::counter(name, 1),
                Err(StateError::InvalidName(_))
            ));
            assert!(matches!(
                Metric::gauge(name, 1.0),
                Err(StateError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn negative_counter_rejected() {
        assert!(matches!(
            Metric::counter("hits", -1),
            Err(StateError::NegativeDelta(_))
        ));
        assert!(Metric::counter("hits", 0).is_ok());
    }

    #[test]
    fn gauge_accepts_any_finite_value() {
        assert!(Metric::gauge("temp", -273.15).is_ok());
        assert!(Metric::gauge("temp", f64::MAX).is_ok());
        assert!(Metric::gauge("temp", f64::NAN).is_err());
        assert!(Metric::gauge("temp", f64::INFINITY).is_err());
    }

    #[test]
    fn parse_path_form() {
        let m = Metric::parse("counter", "hits", "42").unwrap();
        assert_eq!(m.delta(), Some(42));

        let m = Metric::parse("gauge", "temp", "10.5").unwrap();
        assert_eq!(m.gauge_value(), Some(10.5));

        let m = Metric::parse("gauge", "temp", "7").unwrap();
        assert_eq!(m.gauge_value(), Some(7.0));

        assert!(matches!(
            Metric::parse("counter", "hits", "1.5"),
            Err(StateError::InvalidValue { .. })
        ));
        assert!(matches!(
            Metric::parse("gauge", "temp", "warm"),
            Err(StateError::InvalidValue { .. })
        ));
        assert!(matches!(
            Metric::parse("histogram", "x", "1"),
            Err(StateError::InvalidKind(_))
        ));
    }

    #[test]
    fn display_value_formats() {
        assert_eq!(Metric::counter("c", 8).unwrap().display_value(), "8");
        assert_eq!(Metric::gauge("g", 9.0).unwrap().display_value(), "9");
        assert_eq!(Metric::gauge("g", 10.5).unwrap().display_value(), "10.5");
    }

    #[test]
    fn gauge_display_switches_to_exponent_like_printf_g() {
        let cases = [
            (0.0, "0"),
            (123456.7, "123456.7"),
            (100000.0, "100000"),
            (0.0001, "0.0001"),
            (0.00012345, "0.00012345"),
            (1000000.0, "1e+06"),
            (1234567.0, "1.234567e+06"),
            (16000000000.0, "1.6e+10"),
            (0.00001, "1e-05"),
            (-2.5e-7, "-2.5e-07"),
            (1e100, "1e+100"),
            (-3.25e21, "-3.25e+21"),
        ];
        for (value, want) in cases {
            assert_eq!(Metric::gauge("g", value).unwrap().display_value(), want, "{value}");
        }
    }

    #[test]
    fn dto_gauge_with_delta_rejected() {
        let dto: MetricDto = serde_json::from_str(r#"{"id":"t","type":"gauge","delta":1}"#).unwrap();
        assert!(matches!(
            dto.into_metric(),
            Err(StateError::MissingValue { field: "value", .. })
        ));
    }

    #[test]
    fn dto_counter_with_both_fields_rejected() {
        let dto: MetricDto =
            serde_json::from_str(r#"{"id":"t","type":"counter","delta":1,"value":2.0}"#).unwrap();
        assert!(matches!(
            dto.into_metric(),
            Err(StateError::UnexpectedValue { .. })
        ));
    }

    #[test]
    fn dto_non_integer_delta_fails_to_decode() {
        let res = serde_json::from_str::<MetricDto>(r#"{"id":"t","type":"counter","delta":1.5}"#);
        assert!(res.is_err());
    }

    #[test]
    fn dto_omits_absent_payload() {
        let m = Metric::counter("hits", 3).unwrap();
        let json = serde_json::to_string(&MetricDto::from(&m)).unwrap();
        assert_eq!(json, r#"{"id":"hits","type":"counter","delta":3}"#);

        let m = Metric::gauge("temp", 1.25).unwrap();
        let json = serde_json::to_string(&MetricDto::from(&m)).unwrap();
        assert_eq!(json, r#"{"id":"temp","type":"gauge","value":1.25}"#);
    }

    #[test]
    fn key_display_and_parse() {
        let key = MetricKey::parse("gauge", "temp").unwrap();
        assert_eq!(key.to_string(), "gauge/temp");
        assert!(MetricKey::parse("gauge", "1temp").is_err());
        assert!(MetricKey::parse("meter", "temp").is_err());
    }
}
