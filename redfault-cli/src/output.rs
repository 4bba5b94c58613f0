//! Report printing for `run`.

use redfault::lifecycle::{Level, Message};
use redfault::{ProgressReport, StartReport, StopReport};
use serde::Serialize;

use crate::cli::OutputFormat;

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum Event<'a> {
    Start {
        action: &'a str,
        execution_key: &'a str,
        report: &'a StartReport,
    },
    Status {
        report: &'a ProgressReport,
    },
    Stop {
        report: &'a StopReport,
    },
}

pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn start(&self, action: &str, execution_key: &str, report: &StartReport) {
        match self.format {
            OutputFormat::Json => emit(&Event::Start {
                action,
                execution_key,
                report,
            }),
            OutputFormat::Text => {
                println!("started {} ({})", action, execution_key);
                print_messages(&report.messages);
            }
        }
    }

    pub fn status(&self, report: &ProgressReport) {
        match self.format {
            OutputFormat::Json => emit(&Event::Status { report }),
            OutputFormat::Text => {
                if !report.metrics.is_empty() {
                    let line: Vec<String> = report
                        .metrics
                        .iter()
                        .map(|m| format!("{}={}", m.name, m.value))
                        .collect();
                    println!("  {}", line.join(" "));
                }
                print_messages(&report.messages);
                if report.completed {
                    match &report.failure {
                        Some(failure) => println!("completed: FAILED ({})", failure),
                        None => println!("completed"),
                    }
                }
            }
        }
    }

    pub fn stop(&self, report: &StopReport) {
        match self.format {
            OutputFormat::Json => emit(&Event::Stop { report }),
            OutputFormat::Text => {
                print_messages(&report.messages);
                if let Some(counters) = &report.counters {
                    println!(
                        "stopped: {} ticks ({} failed), {} created, {} removed",
                        counters.ticks, counters.failures, counters.created, counters.removed
                    );
                } else {
                    println!("stopped");
                }
            }
        }
    }
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        let level = match message.level {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        println!("  [{}] {}", level, message.text);
    }
}

fn emit(event: &Event<'_>) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!(error = %e, "Failed to encode report"),
    }
}
