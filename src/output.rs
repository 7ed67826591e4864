//! User-facing output channel
//!
//! Everything a developer is meant to read goes through `OutputManager`;
//! diagnostics go through `tracing` instead.

use colored::{Color, Colorize};
use comfy_table::{presets, Attribute, Cell, Table};

struct Icons {
    success: &'static str,
    error: &'static str,
    warning: &'static str,
    info: &'static str,
    bullet: &'static str,
}

const ICONS: Icons = Icons {
    success: "✔",
    error: "✖",
    warning: "⚠",
    info: "ℹ",
    bullet: "•",
};

/// Global CLI options that affect output
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub no_color: bool,
}

/// Output manager handles formatting and display
#[derive(Clone, Debug, Default)]
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    fn line(&self, icon: &str, message: &str, color: Color) -> String {
        if self.options.no_color {
            format!("{} {}", icon, message)
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    /// Display a success message
    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.line(ICONS.success, message, Color::Green));
        }
    }

    /// Display an error message (never suppressed by --quiet)
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.line(ICONS.error, message, Color::Red));
    }

    /// Display a warning message
    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            eprintln!("{}", self.line(ICONS.warning, message, Color::Yellow));
        }
    }

    /// Display an info message
    pub fn info(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.line(ICONS.info, message, Color::Cyan));
        }
    }

    /// Display a heading
    pub fn heading(&self, text: &str) {
        if self.options.quiet {
            return;
        }
        if self.options.no_color {
            println!("\n{}\n{}", text, "=".repeat(text.chars().count()));
        } else {
            println!("\n{}", text.bold());
        }
    }

    /// Display a bullet list item
    pub fn bullet(&self, text: &str) {
        if !self.options.quiet {
            println!("  {} {}", ICONS.bullet, text);
        }
    }

    /// Print SQL verbatim to stdout. Not affected by --quiet so it can be piped.
    pub fn sql(&self, sql: &str) {
        println!("{}", sql.trim_end());
    }

    /// Create a themed table with a bold header row
    pub fn table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(presets::ASCII_FULL);
        } else {
            table.load_preset(presets::UTF8_FULL_CONDENSED);
        }
        table.set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
        table
    }

    /// Print a table built with [`OutputManager::table`]
    pub fn print_table(&self, table: &Table) {
        if !self.options.quiet {
            println!("{}", table);
        }
    }
}
