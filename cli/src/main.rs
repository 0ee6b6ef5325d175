use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use intelscan_core::notifications::send_webhook;
use intelscan_core::server::{self, AppState};
use intelscan_core::{
    read_lines, write_atomic, AppConfig, ConsoleSink, EngineSettings, Finding, LogSink, ResultAggregator,
    ScanEngine, ScanEventSink, ScanReport, ScanRequest, Service, SinkRef, SourceRegistry, TargetManager,
};

#[derive(Parser, Debug)]
#[command(
    name = "intelscan",
    version,
    about = "Multi-source security intelligence scanner",
    override_usage = "intelscan <target>  <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  All configured sources:         intelscan example.com
  Only host and leak lookups:     intelscan 93.184.216.34 -s host,leaks
  Web scan on a custom port:      intelscan https://example.com:8443 -s vuln
  Save the report:                intelscan example.com -o report.json
  Scan from file:                 intelscan -l targets.txt --json
  Dry-run test:                   intelscan example.com --dry-run
  Serve the REST API:             intelscan --serve 127.0.0.1:8080

Provider credentials come from INTELSCAN_{HOST,LEAKS,VULN,PORTS}_{API_KEY,BASE_URL}."
)]
pub struct Args {
    #[arg(required_unless_present_any = ["list", "serve"], help = "IP address, domain, host:port or URL")]
    pub target: Option<String>,

    #[arg(short = 's', long, value_delimiter = ',', value_parser = parse_service,
        help = "Sources to query: host, leaks, vuln, ports (default: all)")]
    pub services: Vec<Service>,

    #[arg(short = 'p', long, help = "Port for the web and port scanners")]
    pub port: Option<u16>,

    #[arg(short = 'o', long, help = "Write the JSON report to this file")]
    pub output: Option<String>,

    #[arg(short = 'l', long = "list", help = "File containing targets (one per line)")]
    pub list: Option<String>,

    #[arg(long, env = "INTELSCAN_CONFIG", help = "JSON config file")]
    pub config: Option<String>,

    #[arg(long, help = "Webhook for High/Critical alerts (Discord, Slack or generic JSON)")]
    pub webhook: Option<String>,

    #[arg(long, help = "Maximum sources queried at once")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Per-source deadline in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, default_value_t = false, help = "Print the report as JSON instead of text")]
    pub json: bool,

    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "ADDR",
        help = "Serve the REST API (default address from config)")]
    pub serve: Option<String>,

    #[arg(short = 'v', long, default_value_t = false, help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, help = "Validate targets without querying any source")]
    pub dry_run: bool,
}

fn parse_service(raw: &str) -> Result<Service, String> {
    raw.parse()
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    init_logging(args.verbose);

    if !args.json {
        print_banner();
    }

    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprint!("{}\r\n", format!("[!] {:#}", e).red());
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    if let Some(t) = args.timeout {
        config.source_timeout = t;
    }
    if let Some(url) = &args.webhook {
        config.webhook_url = Some(url.clone());
    }

    if let Some(addr) = &args.serve {
        let addr = if addr.is_empty() { config.bind.clone() } else { addr.clone() };
        let state = AppState::from_config(&config)?;
        print!("{}\r\n", format!("[+] Serving REST API on http://{}", addr).green().bold());
        std::io::stdout().flush().ok();
        server::serve(&addr, Arc::new(state)).await?;
        return Ok(0);
    }

    let mut targets = TargetManager::new();
    if let Some(list_path) = &args.list {
        let lines = read_lines(list_path).with_context(|| format!("failed to read '{}'", list_path))?;
        let added = targets.extend(&lines);
        if !args.json {
            print!("{}\r\n", format!("[+] Loaded {} target(s) from {}", added, list_path).green().bold());
        }
    }
    if let Some(t) = &args.target {
        targets.add_target(t);
    }
    if targets.is_empty() {
        anyhow::bail!("no targets specified. Provide a target or use -l <file>");
    }

    let mut invalid = 0;
    let mut requests = Vec::new();
    while let Some(raw) = targets.next() {
        let request = ScanRequest::new(raw.clone())
            .with_services(args.services.clone())
            .with_port(args.port);
        match request.validate() {
            Ok(validated) => requests.push((raw, validated)),
            Err(e) => {
                invalid += 1;
                eprint!("{}\r\n", format!("[!] Skipping '{}': {}", raw, e).red());
            }
        }
    }

    if args.dry_run {
        for (raw, request) in &requests {
            let services: Vec<&str> = request.services.iter().map(|s| s.label()).collect();
            println!("[DRY RUN] Would scan target: {} ({})", raw, services.join(", "));
        }
        return Ok(if invalid > 0 { 1 } else { 0 });
    }

    let registry = SourceRegistry::from_config(&config).context("failed to build source clients")?;
    if registry.is_empty() {
        warn!("No sources configured; every service will be skipped");
        if !args.json {
            print!(
                "{}\r\n",
                "[!] No sources configured. Set INTELSCAN_<SOURCE>_API_KEY and INTELSCAN_<SOURCE>_BASE_URL."
                    .yellow()
            );
        }
    }
    let engine = ScanEngine::new(registry, EngineSettings::from_config(&config));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running sources");
            trigger.cancel();
        }
    });

    let total = requests.len();
    let mut reports: Vec<ScanReport> = Vec::with_capacity(total);
    for (i, (raw, request)) in requests.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if total > 1 && !args.json {
            print!(
                "\r\n{}\r\n",
                format!("━━━ Target {}/{}: {} ━━━", i + 1, total, raw).bright_white().bold()
            );
            std::io::stdout().flush().ok();
        }

        let sink: SinkRef = if args.json {
            Arc::new(LogSink)
        } else {
            Arc::new(ProgressSink::new())
        };
        let report = engine.run(request, &cancel, Arc::clone(&sink)).await;
        if !args.json {
            ResultAggregator::report_summary(&report, &sink);
        }

        if let Some(url) = config.webhook_ref() {
            match send_webhook(url, &report).await {
                Ok(true) => info!("Webhook alert sent for {}", report.target),
                Ok(false) => {}
                Err(e) => warn!("Webhook failed for {}: {:#}", report.target, e),
            }
        }
        reports.push(report);
    }

    let document = if reports.len() == 1 {
        serde_json::to_vec_pretty(&reports[0])?
    } else {
        serde_json::to_vec_pretty(&reports)?
    };

    if let Some(output) = &args.output {
        write_atomic(Path::new(output), &document)
            .with_context(|| format!("failed to write report to '{}'", output))?;
        if !args.json {
            print!("{}\r\n", format!("[+] Report written to {}", output).green());
        }
    }
    if args.json {
        println!("{}", String::from_utf8_lossy(&document));
    }

    Ok(if invalid > 0 { 1 } else { 0 })
}

/// Console output with a progress bar over the sources of the current scan.
struct ProgressSink {
    bar: ProgressBar,
    console: ConsoleSink,
}

impl ProgressSink {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar, console: ConsoleSink }
    }
}

impl ScanEventSink for ProgressSink {
    fn on_log(&self, level: &str, message: &str) {
        self.bar.suspend(|| self.console.on_log(level, message));
    }

    fn on_finding(&self, finding: &Finding) {
        self.bar.suspend(|| self.console.on_finding(finding));
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        // Job pollers report their own check counts; only the engine drives the bar.
        if phase != "Sources" {
            self.bar.set_message(format!("{} (check {}/{})", phase, current, total));
            return;
        }
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        if current >= total {
            self.bar.finish_and_clear();
        }
    }
}

/// Prints the intelscan ASCII banner.
fn print_banner() {
    let banner = r#"
   _       _       _
  (_)_ __ | |_ ___| |___  ___ __ _ _ __
  | | '_ \| __/ _ \ / __|/ __/ _` | '_ \
  | | | | | ||  __/ \__ \ (_| (_| | | | |
  |_|_| |_|\__\___|_|___/\___\__,_|_| |_|
    "#;
    print!("{}\r\n", banner.bright_cyan().bold());
    print!("{}\r\n", "──────────────────────────────────────────────────".dimmed());
    std::io::stdout().flush().ok();
}
