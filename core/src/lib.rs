pub mod config;
pub mod core;
pub mod error;
pub mod http;
pub mod modules;
pub mod notifications;
pub mod server;
pub mod utils;

use std::sync::Arc;

pub use crate::config::AppConfig;
pub use crate::core::engine::{EngineSettings, ScanEngine};
pub use crate::core::finding::{Finding, FindingKind, Severity};
pub use crate::core::job::{JobStatus, PollPolicy, ScanJob};
pub use crate::core::result_aggregator::{OutcomeStatus, ResultAggregator, ScanReport, SourceOutcome, Summary};
pub use crate::core::target::{ScanRequest, Target, ValidatedRequest};
pub use crate::core::target_manager::TargetManager;
pub use crate::core::Service;
pub use crate::error::SourceError;
pub use crate::modules::{SourceRegistry, SourceReport};
pub use crate::utils::{read_lines, write_atomic};

/// Output abstraction for the scan pipeline.
/// The CLI renders to the terminal, the REST server forwards to `log`.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

fn severity_badge(severity: Severity) -> String {
    use colored::*;
    let tag = format!("[{}]", severity);
    match severity {
        Severity::Critical => tag.on_red().white().bold().to_string(),
        Severity::High => tag.red().bold().to_string(),
        Severity::Medium => tag.yellow().to_string(),
        Severity::Low => tag.blue().to_string(),
        Severity::Info => tag.dimmed().to_string(),
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        out(&format!(
            "{} {} {}",
            severity_badge(finding.severity),
            finding.title.bold(),
            format!("({})", finding.source.label()).dimmed()
        ));
        out(&format!("    {:<9}{}", "Where:", finding.location.white()));
        if let Some(desc) = &finding.description {
            out(&format!("    {:<9}{}", "Detail:", desc));
        }
        if let Some(reference) = &finding.reference {
            out(&format!("    {:<9}{}", "Ref:", reference.blue()));
        }
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        use std::io::Write;
        if total > 0 {
            print!("{}\r\n", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            print!("{}\r\n", format!("[*] {}", phase).bright_cyan());
        }
        std::io::stdout().flush().ok();
    }
}

/// Forwards scan events to the `log` facade; used where no terminal is attached.
pub struct LogSink;

impl ScanEventSink for LogSink {
    fn on_log(&self, level: &str, message: &str) {
        match level {
            "error" => log::error!("{}", message),
            "warn" => log::warn!("{}", message),
            _ => log::info!("{}", message),
        }
    }

    fn on_finding(&self, finding: &Finding) {
        log::info!(
            "[{}] {} at {} ({})",
            finding.severity,
            finding.title,
            finding.location,
            finding.source.label()
        );
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        log::debug!("{} ({}/{})", phase, current, total);
    }
}
