//! Terminal output helpers.
//!
//! Everything goes to stdout, errors included, so a transcript of a
//! command reads top to bottom.

use colored::Colorize;

const LABEL_WIDTH: usize = 13;

fn label_cell(label: &str) -> String {
    format!("{:<width$}", format!("{label}:"), width = LABEL_WIDTH)
}

fn error_line(msg: &str) -> String {
    format!("  {} {}", "\u{2718}".bright_red(), msg.bright_red())
}

fn fix_line(fix: &str) -> String {
    format!("    {} {}", "fix:".bright_yellow(), fix)
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Aligned "Label:  value" row.
pub fn kv(label: &str, value: &str) {
    println!("  {}{}", label_cell(label), value);
}

/// Same row with the value in green.
pub fn kv_ok(label: &str, value: &str) {
    println!("  {}{}", label_cell(label), value.bright_green());
}

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    println!("{}", error_line(msg));
}

/// Red error + yellow "fix:" suggestion.
pub fn error_with_fix(msg: &str, fix: &str) {
    println!("{}", error_line(msg));
    println!("{}", fix_line(fix));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_align_values() {
        colored::control::set_override(false);
        assert_eq!(label_cell("Code"), "Code:        ");
        assert_eq!(label_cell("Presenter"), "Presenter:   ");
        assert_eq!(label_cell("A very long label").len(), "A very long label:".len());
    }

    #[test]
    fn test_error_and_fix_lines() {
        colored::control::set_override(false);
        assert_eq!(error_line("Demo failed"), "  \u{2718} Demo failed");
        assert_eq!(fix_line("retry"), "    fix: retry");
    }
}
