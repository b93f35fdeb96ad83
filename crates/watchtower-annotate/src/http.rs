//! HTTP entity API client.
//!
//! Two request shapes are supported:
//!
//! - **Per-entity:** `GET {url}?entityType=T&entityCode=C` for each
//!   expression `T/C`. The response `data` is a list of entity records and
//!   the first one is used.
//! - **Batch:** `POST {url}` with `{"expressions": [...]}`. The response
//!   `data` maps each expression to a record or a list of records.
//!
//! An entity record looks like
//! `{"type": "asn", "code": "1234", "attrs": {"fqid": "as1234", ...}}`.
//! Some record types carry their code inside `attrs` instead of at the top
//! level.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use watchtower_types::ViolationMeta;

use crate::config::{AnnotationConfig, LookupMode};
use crate::error::LookupError;
use crate::lookup::Resolution;

/// Client for the entity API.
pub struct HttpLookup {
    client: reqwest::Client,
    url: String,
    mode: LookupMode,
    require_separator: bool,
}

impl HttpLookup {
    /// Create a client from the annotation configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &AnnotationConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LookupError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            mode: config.mode,
            require_separator: config.requires_separator(),
        })
    }

    /// Whether only `type/code` expressions are looked up.
    pub const fn requires_separator(&self) -> bool {
        self.require_separator
    }

    /// Human-readable mode name for logging.
    pub const fn mode_name(&self) -> &'static str {
        match self.mode {
            LookupMode::Batch => "http-batch",
            LookupMode::PerEntity | LookupMode::Fixed => "http-per-entity",
        }
    }

    /// Resolve every expression, one request each or one request total.
    pub async fn resolve(&self, expressions: &[String]) -> Resolution {
        match self.mode {
            LookupMode::Batch => self.resolve_batch(expressions).await,
            LookupMode::PerEntity | LookupMode::Fixed => self.resolve_each(expressions).await,
        }
    }

    async fn resolve_each(&self, expressions: &[String]) -> Resolution {
        let mut resolution = Resolution::default();
        for expression in expressions {
            let outcome = self.resolve_one(expression).await;
            resolution.record(expression.clone(), outcome);
        }
        resolution
    }

    async fn resolve_one(&self, expression: &str) -> Result<ViolationMeta, LookupError> {
        let (entity_type, entity_code) = split_expression(expression)?;
        debug!(expression, entity_type, entity_code, "looking up entity");

        let response = self
            .client
            .get(&self.url)
            .query(&[("entityType", entity_type), ("entityCode", entity_code)])
            .send()
            .await
            .map_err(|e| LookupError::Request(e.to_string()))?;
        let json = read_json(response).await?;
        extract_first_record(&json, expression)
    }

    async fn resolve_batch(&self, expressions: &[String]) -> Resolution {
        let mut resolution = Resolution::default();
        match self.fetch_batch(expressions).await {
            Ok(json) => {
                for expression in expressions {
                    let outcome = extract_batch_record(&json, expression);
                    resolution.record(expression.clone(), outcome);
                }
            }
            Err(e) => {
                for expression in expressions {
                    resolution.record(expression.clone(), Err(e.clone()));
                }
            }
        }
        resolution
    }

    async fn fetch_batch(&self, expressions: &[String]) -> Result<Value, LookupError> {
        debug!(count = expressions.len(), "looking up entities (batch)");
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "expressions": expressions }))
            .send()
            .await
            .map_err(|e| LookupError::Request(e.to_string()))?;
        read_json(response).await
    }
}

/// Read a JSON body, turning non-success statuses into errors.
async fn read_json(response: reqwest::Response) -> Result<Value, LookupError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        return Err(LookupError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| LookupError::Request(format!("response is not JSON: {e}")))
}

/// Split `type/code[/...]` into its first two components.
fn split_expression(expression: &str) -> Result<(&str, &str), LookupError> {
    let mut parts = expression.split('/');
    match (parts.next(), parts.next()) {
        (Some(entity_type), Some(entity_code)) if !entity_type.is_empty() && !entity_code.is_empty() => {
            Ok((entity_type, entity_code))
        }
        _ => Err(LookupError::Malformed {
            expression: expression.to_owned(),
            reason: "expected a type/code expression".to_owned(),
        }),
    }
}

/// The API's own `error` field, if any.
fn api_error(json: &Value) -> String {
    json.get("error")
        .and_then(Value::as_str)
        .unwrap_or("response has no data")
        .to_owned()
}

/// Extract `data[0]` from a per-entity response.
fn extract_first_record(json: &Value, expression: &str) -> Result<ViolationMeta, LookupError> {
    let record = json
        .get("data")
        .and_then(Value::as_array)
        .and_then(|data| data.first())
        .ok_or_else(|| LookupError::MissingData {
            expression: expression.to_owned(),
            detail: api_error(json),
        })?;
    parse_record(record, expression)
}

/// Extract `data[expression]` from a batch response.
fn extract_batch_record(json: &Value, expression: &str) -> Result<ViolationMeta, LookupError> {
    let data = json
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| LookupError::MissingData {
            expression: expression.to_owned(),
            detail: api_error(json),
        })?;
    let entry = data.get(expression).ok_or_else(|| LookupError::MissingData {
        expression: expression.to_owned(),
        detail: "expression absent from batch response".to_owned(),
    })?;
    let record = match entry {
        Value::Array(records) => records.first().ok_or_else(|| LookupError::MissingData {
            expression: expression.to_owned(),
            detail: "empty record list".to_owned(),
        })?,
        other => other,
    };
    parse_record(record, expression)
}

/// Parse one entity record into violation metadata.
fn parse_record(record: &Value, expression: &str) -> Result<ViolationMeta, LookupError> {
    let malformed = |reason: &str| LookupError::Malformed {
        expression: expression.to_owned(),
        reason: reason.to_owned(),
    };
    let attrs = record.get("attrs");

    let meta_type = record
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing type"))?;
    let fqid = attrs
        .and_then(|a| a.get("fqid"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing attrs.fqid"))?;
    let meta_code = record
        .get("code")
        .or_else(|| attrs.and_then(|a| a.get("code")))
        .and_then(scalar_to_string)
        .ok_or_else(|| malformed("missing code"))?;

    Ok(ViolationMeta::new(meta_type, fqid, meta_code))
}

/// Codes are strings for most entity types but numbers for some.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
