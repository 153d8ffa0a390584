//! Shared UI primitives for subcommand output.

use colored::Colorize;

/// Print an error message.
pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Print a success message.
pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<16}{}", format!("{label}:"), value);
}

/// Key-value with green value.
pub fn kv_ok(label: &str, value: &str) {
    println!("  {:<16}{}", format!("{label}:"), value.bright_green());
}

/// Key-value with yellow value.
pub fn kv_warn(label: &str, value: &str) {
    println!("  {:<16}{}", format!("{label}:"), value.bright_yellow());
}

/// Hint line: "  hint: message" in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

pub fn blank() {
    println!();
}
