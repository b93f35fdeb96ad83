//! Slack sink.
//!
//! Posts one message per annotated violation through `chat.postMessage`.
//! Per-AS violations are too noisy for a channel and are skipped. Each
//! message carries Block Kit blocks plus a plain-text fallback rendered
//! from a `minijinja` template.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use minijinja::Environment;
use serde::Serialize;
use tracing::{debug, info, warn};
use watchtower_annotate::{EntityLookup, annotate_alert};
use watchtower_types::{Alert, AlertLevel, Violation};

use crate::config::SlackConfig;
use crate::error::SinkError;

/// Entity type never posted to the channel.
const SUPPRESSED_META_TYPE: &str = "asn";

/// Dashboard window on each side of the violation, in seconds.
const DASHBOARD_WINDOW_SECS: i64 = 28_800;

/// Everything one message is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDetails {
    /// Alert name.
    pub name: String,
    /// Entity type of the violation.
    pub meta_type: String,
    /// Entity code of the violation.
    pub meta_code: String,
    /// Dashboard window start.
    pub from_time: i64,
    /// Dashboard window end.
    pub until_time: i64,
    /// `Outage Start` or `Outage End`.
    pub position: String,
    /// Observed value, or `Unknown`.
    pub actual: String,
    /// Baseline value, or `Unknown`.
    pub predicted: String,
    /// Relative drop as a percentage, or `Unknown`.
    pub pct_drop: String,
    /// Violation time, `%m/%d/%Y %H:%M:%S UTC`.
    pub alert_time: String,
}

impl MessageDetails {
    /// Build the details for one violation, or `None` if it should not be
    /// posted (no metadata, or a suppressed entity type).
    pub fn for_violation(alert: &Alert, violation: &Violation) -> Option<Self> {
        let meta = violation.meta()?;
        if meta.meta_type == SUPPRESSED_META_TYPE {
            return None;
        }
        let time = violation.time();
        let position = if alert.level() == AlertLevel::Normal {
            "Outage End"
        } else {
            "Outage Start"
        };
        Some(Self {
            name: alert.name().to_owned(),
            meta_type: meta.meta_type.clone(),
            meta_code: meta.meta_code.clone(),
            from_time: time.saturating_sub(DASHBOARD_WINDOW_SECS),
            until_time: time.saturating_add(DASHBOARD_WINDOW_SECS),
            position: position.to_owned(),
            actual: whole_number(violation.value()),
            predicted: whole_number(violation.history_value()),
            pct_drop: relative_drop_pct(violation.value(), violation.history_value())
                .map_or_else(|| "Unknown".to_owned(), |d| format!("{d:.2}%")),
            alert_time: DateTime::from_timestamp(time, 0).map_or_else(
                || time.to_string(),
                |t| t.format("%m/%d/%Y %H:%M:%S UTC").to_string(),
            ),
        })
    }
}

/// Drop from the baseline as a percentage of the baseline.
///
/// `None` when either value is missing or the baseline is zero.
pub fn relative_drop_pct(value: Option<f64>, history_value: Option<f64>) -> Option<f64> {
    let (value, history) = (value?, history_value?);
    if history.abs() < f64::EPSILON {
        return None;
    }
    Some((history - value) / history * 100.0)
}

fn whole_number(value: Option<f64>) -> String {
    value.map_or_else(|| "Unknown".to_owned(), |v| format!("{:.0}", v.trunc()))
}

/// Capitalize the first letter of each word, as in `Country` or `Region`.
fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dashboard deep link for one entity and time window.
pub fn dashboard_url(base: &str, details: &MessageDetails) -> String {
    format!(
        "{base}#view=inspect&entity={}/{}&lastView=overview&from={}&until={}",
        details.meta_type, details.meta_code, details.from_time, details.until_time
    )
}

/// Block Kit layout for one message.
pub fn message_blocks(dashboard_base: &str, details: &MessageDetails) -> serde_json::Value {
    serde_json::json!([
        {
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("*{}*", details.name)},
            "accessory": {
                "type": "button",
                "text": {"type": "plain_text", "text": "Show in Dashboard", "emoji": true},
                "url": dashboard_url(dashboard_base, details)
            }
        },
        {
            "type": "section",
            "fields": [
                {"type": "mrkdwn", "text": format!("*Type:* {}", details.position)},
                {
                    "type": "mrkdwn",
                    "text": format!("*{}*: {}", title_case(&details.meta_type), details.meta_code)
                }
            ]
        },
        {
            "type": "section",
            "fields": [
                {"type": "mrkdwn", "text": format!("*Current Value:* {}", details.actual)},
                {"type": "mrkdwn", "text": format!("*Predicted Value:* {}", details.predicted)},
                {"type": "mrkdwn", "text": format!("*Relative Drop:* {}", details.pct_drop)}
            ]
        },
        {
            "type": "context",
            "elements": [{"type": "mrkdwn", "text": details.alert_time}]
        },
        {"type": "divider"}
    ])
}

/// How Slack answered one `chat.postMessage` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// Message accepted.
    Sent,
    /// Rate limited; retry after the backoff.
    RateLimited,
}

/// Classify a `chat.postMessage` response.
///
/// HTTP 429 and `{"ok": false, "error": "ratelimited"}` are rate limits.
///
/// # Errors
///
/// Returns [`SinkError::Slack`] for any other failure.
pub fn classify_response(status: u16, body: &serde_json::Value) -> Result<PostOutcome, SinkError> {
    if status == 429 {
        return Ok(PostOutcome::RateLimited);
    }
    let error = body.get("error").and_then(serde_json::Value::as_str);
    if error == Some("ratelimited") {
        return Ok(PostOutcome::RateLimited);
    }
    if !(200..300).contains(&status) {
        return Err(SinkError::Slack(format!(
            "chat.postMessage returned {status}: {}",
            error.unwrap_or("no error field")
        )));
    }
    match body.get("ok").and_then(serde_json::Value::as_bool) {
        Some(true) => Ok(PostOutcome::Sent),
        _ => Err(SinkError::Slack(format!(
            "chat.postMessage failed: {}",
            error.unwrap_or("malformed response")
        ))),
    }
}

/// Posts violation notifications to a Slack channel.
pub struct SlackSink {
    config: SlackConfig,
    lookup: Arc<EntityLookup>,
    client: reqwest::Client,
    templates: Box<Environment<'static>>,
}

impl SlackSink {
    /// Build the HTTP client and load the text template.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Template`] if the template does not parse, or
    /// [`SinkError::Slack`] if the client cannot be built.
    pub fn new(config: SlackConfig, lookup: Arc<EntityLookup>) -> Result<Self, SinkError> {
        let mut env = Environment::new();
        env.add_template_owned("text", config.text_template.clone())
            .map_err(|e| SinkError::Template(format!("failed to add text template: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SinkError::Slack(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            lookup,
            client,
            templates: Box::new(env),
        })
    }

    /// Log the target channel. The client is ready from construction.
    pub fn start(&self) {
        info!(
            channel = self.config.channel.as_str(),
            api_url = self.config.api_url.as_str(),
            "slack sink ready"
        );
    }

    /// Annotate the alert and post one message per qualifying violation.
    ///
    /// # Errors
    ///
    /// Returns the first post failure; later violations of the alert are not
    /// posted.
    pub async fn handle_alert(&self, alert: &mut Alert) -> Result<(), SinkError> {
        info!(fqid = alert.fqid(), "slack handling alert");
        let annotation = annotate_alert(alert, &self.lookup).await;
        if annotation.failed > 0 {
            warn!(
                alert = alert.name(),
                unresolved = annotation.failed,
                "no message for violations without entity metadata"
            );
        }

        for violation in alert.violations() {
            let Some(details) = MessageDetails::for_violation(alert, violation) else {
                continue;
            };
            let blocks = message_blocks(&self.config.dashboard_url, &details);
            let text = self.render_text(&details)?;
            self.post(&blocks, &text).await?;
        }
        Ok(())
    }

    /// Render the fallback text for one message.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Template`] on a render failure.
    pub fn render_text(&self, details: &MessageDetails) -> Result<String, SinkError> {
        self.templates
            .get_template("text")
            .map_err(|e| SinkError::Template(format!("missing text template: {e}")))?
            .render(details)
            .map_err(|e| SinkError::Template(format!("text render failed: {e}")))
    }

    async fn post(&self, blocks: &serde_json::Value, text: &str) -> Result<(), SinkError> {
        let url = format!("{}/chat.postMessage", self.config.api_url);
        let body = serde_json::json!({
            "channel": self.config.channel,
            "blocks": blocks,
            "text": text,
        });

        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| SinkError::Slack(format!("chat.postMessage request failed: {e}")))?;

            let status = response.status().as_u16();
            let json: serde_json::Value = response.json().await.unwrap_or_default();
            match classify_response(status, &json)? {
                PostOutcome::Sent => {
                    debug!(attempts, "slack message posted");
                    return Ok(());
                }
                PostOutcome::RateLimited if attempts >= self.config.rate_limit_retries => {
                    return Err(SinkError::RateLimited { attempts });
                }
                PostOutcome::RateLimited => {
                    warn!(
                        attempts,
                        backoff_secs = self.config.rate_limit_backoff_secs,
                        "hit slack rate limit, waiting"
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.rate_limit_backoff_secs))
                        .await;
                }
            }
        }
    }
}

impl std::fmt::Debug for SlackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackSink")
            .field("channel", &self.config.channel)
            .field("api_url", &self.config.api_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::collections::BTreeMap;

    use watchtower_annotate::FixedLookup;
    use watchtower_types::{AlertBuilder, ViolationMeta};

    use super::*;

    fn lookup() -> Arc<EntityLookup> {
        let table = BTreeMap::from([
            ("asn/1234".to_owned(), ViolationMeta::new("asn", "as1234", "1234")),
            ("country/NZ".to_owned(), ViolationMeta::new("country", "country.NZ", "NZ")),
        ]);
        Arc::new(EntityLookup::Fixed(FixedLookup::new(table, true)))
    }

    fn alert(level: &str, expressions: &[&str]) -> Alert {
        AlertBuilder::new("ioda.outage", "Telescope source IPs", level, 1_600_000_000)
            .violations(
                expressions
                    .iter()
                    .map(|e| {
                        Violation::new(*e, "drop", 1_600_000_000)
                            .with_values(Some(80.4), Some(100.0))
                    })
                    .collect(),
            )
            .build()
            .unwrap()
    }

    /// A sink pointed at a port nothing listens on.
    fn unreachable_sink() -> SlackSink {
        let mut config = SlackConfig::new("xoxb-test", "#outages");
        config.api_url = "http://127.0.0.1:9".to_owned();
        config.timeout_secs = 2;
        SlackSink::new(config, lookup()).unwrap()
    }

    #[tokio::test]
    async fn details_and_text_for_country_violation() {
        let lookup = lookup();
        let mut alert = alert("critical", &["country/NZ"]);
        assert_eq!(annotate_alert(&mut alert, &lookup).await.resolved, 1);

        let details = MessageDetails::for_violation(&alert, &alert.violations()[0]).unwrap();
        assert_eq!(details.position, "Outage Start");
        assert_eq!(details.actual, "80");
        assert_eq!(details.predicted, "100");
        assert_eq!(details.pct_drop, "19.60%");
        assert_eq!(details.alert_time, "09/13/2020 12:26:40 UTC");
        assert_eq!(details.until_time.saturating_sub(details.from_time), 57_600);

        let sink = unreachable_sink();
        let text = sink.render_text(&details).unwrap();
        assert_eq!(
            text,
            "Outage Start: Telescope source IPs\nCountry: NZ\n\
             Current Value: 80, Predicted Value: 100, Relative Drop: 19.60%\n\
             09/13/2020 12:26:40 UTC"
        );

        let blocks = message_blocks(crate::config::DEFAULT_DASHBOARD_URL, &details);
        let url = blocks[0]["accessory"]["url"].as_str().unwrap();
        assert!(url.contains("entity=country/NZ"));
        assert_eq!(blocks[4]["type"], "divider");
    }

    #[tokio::test]
    async fn asn_and_unannotated_violations_are_not_posted() {
        let sink = unreachable_sink();
        let mut alert = alert("critical", &["asn/1234", "unknown-series"]);
        sink.handle_alert(&mut alert).await.unwrap();
        assert!(alert.is_annotated());
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let sink = unreachable_sink();
        let mut alert = alert("normal", &["country/NZ"]);
        let err = sink.handle_alert(&mut alert).await.unwrap_err();
        assert!(matches!(err, SinkError::Slack(_)));
    }

    #[test]
    fn normal_alert_ends_outage() {
        let mut alert = alert("normal", &["country/NZ"]);
        alert.violations_mut()[0].set_meta(ViolationMeta::new("country", "country.NZ", "NZ"));
        let details = MessageDetails::for_violation(&alert, &alert.violations()[0]).unwrap();
        assert_eq!(details.position, "Outage End");
    }

    #[test]
    fn relative_drop_needs_a_baseline() {
        assert_eq!(relative_drop_pct(Some(80.0), None), None);
        assert_eq!(relative_drop_pct(Some(80.0), Some(0.0)), None);
        let drop = relative_drop_pct(Some(50.0), Some(200.0)).unwrap();
        assert!((drop - 75.0).abs() < 1e-9);
    }

    #[test]
    fn response_classification() {
        let ok = serde_json::json!({"ok": true});
        let limited = serde_json::json!({"ok": false, "error": "ratelimited"});
        let denied = serde_json::json!({"ok": false, "error": "channel_not_found"});

        assert_eq!(classify_response(200, &ok).unwrap(), PostOutcome::Sent);
        assert_eq!(classify_response(200, &limited).unwrap(), PostOutcome::RateLimited);
        assert_eq!(
            classify_response(429, &serde_json::Value::Null).unwrap(),
            PostOutcome::RateLimited
        );
        assert!(matches!(classify_response(200, &denied), Err(SinkError::Slack(m)) if m.contains("channel_not_found")));
        assert!(classify_response(500, &serde_json::Value::Null).is_err());
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("country"), "Country");
        assert_eq!(title_case("region"), "Region");
        assert_eq!(title_case(""), "");
    }
}
