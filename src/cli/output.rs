//! CLI output formatting

use crate::core::state::{InvocationReport, InvocationStatus};
use crate::core::value::Map;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format an invocation status for display
pub fn format_status(status: InvocationStatus) -> String {
    match status {
        InvocationStatus::Completed => style("COMPLETED").green().to_string(),
        InvocationStatus::Faulted => style("FAULTED").red().to_string(),
        InvocationStatus::Halted { step } => {
            style(format!("HALTED (step {})", step)).yellow().to_string()
        }
        InvocationStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// One-line summary of a finished invocation
pub fn format_report(report: &InvocationReport) -> String {
    let icon = if report.is_success() { CHECK } else { CROSS };
    let millis = report.duration().num_milliseconds();

    let mut line = format!(
        "{} {} ({}) {} - {} steps in {}ms",
        icon,
        style(&report.pipeline).bold(),
        style(&report.invocation_id.to_string()[..8]).dim(),
        format_status(report.status),
        report.steps_run,
        millis
    );
    if let Some(fault) = &report.fault {
        line.push_str(&format!("\n  {} {}", style("fault:").red(), fault));
    }
    line
}

/// Store contents as sorted `key = value` lines
pub fn format_store(values: &Map, max_width: usize) -> String {
    let mut keys: Vec<_> = values.keys().collect();
    keys.sort();

    keys.into_iter()
        .map(|key| {
            let value = values[key].to_string();
            format!("  {} = {}", style(key).cyan(), truncate(&value, max_width))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut a value down to `max_width` characters
pub fn truncate(text: &str, max_width: usize) -> String {
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_width).collect();
    format!("{}{}", cut, style("...").dim())
}
