use std::time::Duration;

use anyhow::Context;
use log::{debug, info};
use serde_json::{json, Value};

use crate::core::finding::Finding;
use crate::core::result_aggregator::ScanReport;

/// Most findings listed in one alert.
const MAX_LISTED: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Discord,
    Slack,
    Generic,
}

impl WebhookKind {
    pub fn detect(url: &str) -> Self {
        if url.contains("discord.com/api/webhooks") || url.contains("discordapp.com/api/webhooks") {
            WebhookKind::Discord
        } else if url.contains("hooks.slack.com") {
            WebhookKind::Slack
        } else {
            WebhookKind::Generic
        }
    }
}

fn finding_line(f: &Finding) -> String {
    format!("[{}] {} at {} ({})", f.severity, f.title, f.location, f.source.label())
}

/// Alert body for the report's High and Critical findings, shaped for the
/// webhook's platform. `None` when there is nothing to alert on.
pub fn build_payload(kind: WebhookKind, report: &ScanReport) -> Option<Value> {
    let alerts: Vec<&Finding> = report.alertable().collect();
    if alerts.is_empty() {
        return None;
    }
    let s = &report.summary;
    let headline = format!(
        "{} critical / {} high finding(s) on {} (risk score {}/100)",
        s.critical, s.high, report.target, s.risk_score
    );
    let mut lines: Vec<String> = alerts.iter().take(MAX_LISTED).map(|f| finding_line(f)).collect();
    if alerts.len() > MAX_LISTED {
        lines.push(format!("... and {} more", alerts.len() - MAX_LISTED));
    }

    let payload = match kind {
        WebhookKind::Discord => json!({
            "embeds": [{
                "title": format!("Findings on {}", report.target),
                "description": headline,
                "color": if s.critical > 0 { 15158332 } else { 15105570 },
                "fields": alerts.iter().take(MAX_LISTED).map(|f| json!({
                    "name": format!("[{}] {}", f.severity, f.title),
                    "value": f.location,
                    "inline": false
                })).collect::<Vec<_>>(),
                "footer": { "text": "intelscan" }
            }]
        }),
        WebhookKind::Slack => json!({
            "text": format!("*{}*\n{}", headline, lines.iter().map(|l| format!("• `{}`", l)).collect::<Vec<_>>().join("\n"))
        }),
        WebhookKind::Generic => json!({
            "event": "scan_findings",
            "target": report.target,
            "summary": report.summary,
            "findings": alerts,
        }),
    };
    Some(payload)
}

/// Posts a summary of High+ findings. Returns whether anything was sent.
pub async fn send_webhook(webhook_url: &str, report: &ScanReport) -> anyhow::Result<bool> {
    let kind = WebhookKind::detect(webhook_url);
    let Some(payload) = build_payload(kind, report) else {
        debug!("No high-severity findings for {}, webhook not sent", report.target);
        return Ok(false);
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build webhook client")?;
    client
        .post(webhook_url)
        .json(&payload)
        .send()
        .await
        .context("webhook request failed")?
        .error_for_status()
        .context("webhook rejected the alert")?;

    info!("Sent {:?} webhook alert for {}", kind, report.target);
    Ok(true)
}
