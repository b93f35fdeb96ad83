//! Alerts, violations and annotation metadata.
//!
//! An [`Alert`] is validated once when it is built (either through
//! [`AlertBuilder`] or by decoding a stream payload) and is read-only
//! afterwards, with one exception: violation metadata may be filled in by
//! the annotation step, exactly once per violation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::level::AlertLevel;

/// Descriptive identity resolved for a violation's expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationMeta {
    /// Entity type, e.g. `asn`, `country`, `region`.
    pub meta_type: String,
    /// Stable, dot-safe identifier for the entity, e.g. `as1234`.
    pub fqid: String,
    /// Entity code within its type, e.g. `1234`.
    pub meta_code: String,
}

impl ViolationMeta {
    /// Create metadata from its three parts.
    pub fn new(
        meta_type: impl Into<String>,
        fqid: impl Into<String>,
        meta_code: impl Into<String>,
    ) -> Self {
        Self {
            meta_type: meta_type.into(),
            fqid: fqid.into(),
            meta_code: meta_code.into(),
        }
    }
}

/// One series or sub-entity that exhibited the alerting condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    expression: String,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    history_value: Option<f64>,
    #[serde(default)]
    history: Option<Vec<f64>>,
    time: i64,
    #[serde(default)]
    meta: Option<ViolationMeta>,
}

impl Violation {
    /// Create a violation with no observed values and no metadata.
    pub fn new(expression: impl Into<String>, condition: impl Into<String>, time: i64) -> Self {
        Self {
            expression: expression.into(),
            condition: condition.into(),
            value: None,
            history_value: None,
            history: None,
            time,
            meta: None,
        }
    }

    /// Set the observed and baseline values.
    #[must_use]
    pub const fn with_values(mut self, value: Option<f64>, history_value: Option<f64>) -> Self {
        self.value = value;
        self.history_value = history_value;
        self
    }

    /// Attach the recent series the detector compared against.
    #[must_use]
    pub fn with_history(mut self, history: Vec<f64>) -> Self {
        self.history = Some(history);
        self
    }

    /// Series or entity path, e.g. `asn/1234`.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The rule that fired.
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// Observed value, if the detector had one.
    pub const fn value(&self) -> Option<f64> {
        self.value
    }

    /// Baseline or predicted value, if the detector had one.
    pub const fn history_value(&self) -> Option<f64> {
        self.history_value
    }

    /// Recent series, if the detector attached it.
    pub fn history(&self) -> Option<&[f64]> {
        self.history.as_deref()
    }

    /// Epoch seconds of the violating data point.
    pub const fn time(&self) -> i64 {
        self.time
    }

    /// Resolved metadata, `None` until annotated or when unresolvable.
    pub const fn meta(&self) -> Option<&ViolationMeta> {
        self.meta.as_ref()
    }

    /// Fill in metadata if none is set yet.
    ///
    /// Returns `false` and leaves the violation untouched when metadata was
    /// already present.
    pub fn set_meta(&mut self, meta: ViolationMeta) -> bool {
        if self.meta.is_some() {
            return false;
        }
        self.meta = Some(meta);
        true
    }
}

/// One detection event for a monitored entity and condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AlertWire")]
pub struct Alert {
    fqid: String,
    name: String,
    level: AlertLevel,
    time: i64,
    expression: String,
    history_expression: String,
    method: String,
    violations: Vec<Violation>,
    #[serde(skip)]
    violations_annotated: bool,
}

/// Wire shape of an alert before validation.
#[derive(Deserialize)]
struct AlertWire {
    fqid: String,
    name: String,
    level: String,
    time: i64,
    #[serde(default)]
    expression: String,
    #[serde(default)]
    history_expression: String,
    #[serde(default)]
    method: String,
    violations: Vec<Violation>,
}

impl TryFrom<AlertWire> for Alert {
    type Error = ValidationError;

    fn try_from(wire: AlertWire) -> Result<Self, Self::Error> {
        AlertBuilder::new(wire.fqid, wire.name, wire.level, wire.time)
            .expression(wire.expression)
            .history_expression(wire.history_expression)
            .method(wire.method)
            .violations(wire.violations)
            .build()
    }
}

impl Alert {
    /// Stable identity of the monitored entity and condition.
    pub fn fqid(&self) -> &str {
        &self.fqid
    }

    /// Human-readable alert name; also the alert type for per-type state.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reported severity.
    pub const fn level(&self) -> AlertLevel {
        self.level
    }

    /// UTC epoch seconds the alert refers to.
    pub const fn time(&self) -> i64 {
        self.time
    }

    /// Query defining the monitored series.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Query defining the baseline series.
    pub fn history_expression(&self) -> &str {
        &self.history_expression
    }

    /// Detection method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Violations in detector order.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Mutable access to the violations, for the annotation step.
    pub fn violations_mut(&mut self) -> &mut [Violation] {
        &mut self.violations
    }

    /// Whether the annotation pass already ran for this alert.
    pub const fn is_annotated(&self) -> bool {
        self.violations_annotated
    }

    /// Record that the annotation pass ran.
    pub const fn mark_annotated(&mut self) {
        self.violations_annotated = true;
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "fqid": self.fqid,
            "name": self.name,
            "level": self.level,
            "time": self.time,
            "expression": self.expression,
            "history_expression": self.history_expression,
            "method": self.method,
            "violations": self.violations,
        })
    }
}

/// Validating constructor for [`Alert`].
#[derive(Debug, Clone)]
pub struct AlertBuilder {
    fqid: String,
    name: String,
    level: String,
    time: i64,
    expression: String,
    history_expression: String,
    method: String,
    violations: Vec<Violation>,
}

impl AlertBuilder {
    /// Start building an alert from its required fields.
    ///
    /// `level` is validated by [`AlertBuilder::build`].
    pub fn new(
        fqid: impl Into<String>,
        name: impl Into<String>,
        level: impl Into<String>,
        time: i64,
    ) -> Self {
        Self {
            fqid: fqid.into(),
            name: name.into(),
            level: level.into(),
            time,
            expression: String::new(),
            history_expression: String::new(),
            method: String::new(),
            violations: Vec::new(),
        }
    }

    /// Set the monitored series query.
    #[must_use]
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    /// Set the baseline series query.
    #[must_use]
    pub fn history_expression(mut self, history_expression: impl Into<String>) -> Self {
        self.history_expression = history_expression.into();
        self
    }

    /// Set the detection method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Append one violation.
    #[must_use]
    pub fn violation(mut self, violation: Violation) -> Self {
        self.violations.push(violation);
        self
    }

    /// Replace all violations.
    #[must_use]
    pub fn violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    /// Validate and produce the alert.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] for an empty `fqid` or
    /// `name`, [`ValidationError::InvalidLevel`] for an unknown level, and
    /// [`ValidationError::NegativeTime`] for a negative time.
    pub fn build(self) -> Result<Alert, ValidationError> {
        if self.fqid.is_empty() {
            return Err(ValidationError::MissingField("fqid"));
        }
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        let level: AlertLevel = self.level.parse()?;
        if self.time < 0 {
            return Err(ValidationError::NegativeTime(self.time));
        }
        Ok(Alert {
            fqid: self.fqid,
            name: self.name,
            level,
            time: self.time,
            expression: self.expression,
            history_expression: self.history_expression,
            method: self.method,
            violations: self.violations,
            violations_annotated: false,
        })
    }
}
