//! Terminal output helpers. Uses `colored`.

use colored::Colorize;
use framewire_types::{Diagnostic, Severity};

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Hint line: "  hint: message" in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

pub fn blank() {
    println!();
}

/// One diagnostic line, colored by severity.
pub fn diagnostic(d: &Diagnostic) {
    let level = match d.severity {
        Severity::Debug => "debug".dimmed(),
        Severity::Info => "info ".bright_green(),
        Severity::Warning => "warn ".bright_yellow(),
        Severity::Error => "error".bright_red(),
    };
    println!(
        "    {} {} {} {}",
        d.at.format("%H:%M:%S%.3f").to_string().dimmed(),
        level,
        d.tag.cyan(),
        d.message
    );
}

/// Print a diagnostic history oldest first.
pub fn diagnostics(history: &[Diagnostic]) {
    for d in history.iter().rev() {
        diagnostic(d);
    }
}
