//! Terminal rendering of the scan event stream

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use netscout_core::{PortResult, RiskLevel, ScanEvent};

/// Renders events either as formatted terminal output or JSON lines
pub struct EventPrinter {
    json: bool,
    bar: Option<ProgressBar>,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self { json, bar: None }
    }

    pub fn handle(&mut self, event: &ScanEvent) {
        if self.json {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
            return;
        }

        match event {
            ScanEvent::ScanStart {
                target,
                resolved_ip,
                total_ports,
                freshness,
                ..
            } => {
                let freshness_note = match freshness {
                    netscout_core::Freshness::Cached => " (cached)".dimmed().to_string(),
                    netscout_core::Freshness::Fresh => String::new(),
                };
                println!(
                    "{} {} ({}) - {} ports{}",
                    "Scanning".bold(),
                    target,
                    resolved_ip,
                    total_ports,
                    freshness_note
                );
                let bar = ProgressBar::new(100);
                bar.set_style(
                    ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                self.bar = Some(bar);
            }
            ScanEvent::TierStart { priority, count, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_message(format!("{} tier ({} ports)", priority, count));
                }
            }
            ScanEvent::OpenPort { port_result, progress } => {
                self.update_bar(*progress);
                let line = format_port(port_result);
                if let Some(bar) = &self.bar {
                    bar.println(line);
                } else {
                    println!("{}", line);
                }
            }
            ScanEvent::TierComplete { progress, .. } => {
                self.update_bar(*progress);
            }
            ScanEvent::ScanComplete {
                open_ports,
                closed,
                filtered,
                ..
            } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
                println!(
                    "\n{} {} open, {} closed, {} filtered",
                    "Done:".bold().green(),
                    open_ports,
                    closed,
                    filtered
                );
            }
            ScanEvent::ScanError { message } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
                eprintln!("{} {}", "Scan failed:".bold().red(), message);
            }
            ScanEvent::PreScanWarning {
                target,
                resolved_ip,
                ..
            } => {
                eprintln!(
                    "{} {} ({}) answered on no sentinel port.\n\
                     Re-run with --force --yes to scan it anyway.",
                    "Warning:".bold().yellow(),
                    target,
                    resolved_ip
                );
            }
        }
    }

    fn update_bar(&self, progress: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position(progress.round() as u64);
        }
    }
}

fn format_port(result: &PortResult) -> String {
    let mut line = format!(
        "  {} {}",
        format!("{}/tcp", result.port).bold(),
        "open".green()
    );
    if let Some(service) = &result.service {
        line.push_str(&format!(" {}", service.cyan()));
    }
    if let Some(version) = &result.version {
        line.push_str(&format!(" {}", version.dimmed()));
    }
    if let Some(risk) = result.risk {
        line.push_str(&format!(" [{}]", colorize_risk(risk)));
    }
    if let Some(http) = &result.http {
        line.push_str(&format!(" (security score {})", http.security_score));
    }
    line
}

fn colorize_risk(risk: RiskLevel) -> colored::ColoredString {
    let text = risk.to_string();
    match risk {
        RiskLevel::Critical => text.red().bold(),
        RiskLevel::High => text.red(),
        RiskLevel::Medium => text.yellow(),
        RiskLevel::Low => text.normal(),
        RiskLevel::Info => text.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netscout_core::PortState;

    #[test]
    fn test_format_port_includes_service_and_risk() {
        let mut result = PortResult::new(23, PortState::Open).with_service("telnet", 0.9);
        result.risk = Some(RiskLevel::Critical);

        let line = format_port(&result);
        assert!(line.contains("23/tcp"));
        assert!(line.contains("telnet"));
        assert!(line.contains("CRITICAL"));
    }

    #[test]
    fn test_json_mode_emits_parseable_lines() {
        // JSON mode writes through println; just verify serialization here
        let event = ScanEvent::ScanError {
            message: "boom".to_string(),
        };
        let line = serde_json::to_string(&event).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["type"], "scan_error");
    }
}
