//! Colored terminal output for the `depot` binary
//!
//! Uses owo-colors. Library code logs through `tracing` instead; these
//! helpers are for results a user asked for.

use owo_colors::OwoColorize;

/// Print an action header (blue, bold)
/// Example: "==> Resolving acme:widget:1.0@jar"
pub fn action(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

/// Print a detail line (dimmed)
/// Example: "     from central (https://...)"
pub fn detail(message: &str) {
    println!("     {}", message.dimmed());
}

/// Print a success message (green)
pub fn success(message: &str) {
    println!("{} {}", "==>".green().bold(), message.green());
}

/// Print an info message (cyan)
pub fn info(message: &str) {
    println!("{} {}", "::".cyan(), message);
}

/// Print an error message (red)
pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message.red());
}

/// Print a skip message (dimmed)
/// Example: "==> acme:widget:1.0@jar not found in any repository"
pub fn skip(message: &str) {
    println!("{} {}", "==>".dimmed(), message.dimmed());
}

/// Print one entry of a listing
pub fn list_item(name: &str, annotation: &str) {
    println!("  {} {}", name, annotation.dimmed());
}
