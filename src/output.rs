//! Terminal rendering of session events.
//! Used by `earshot replay`.

use crate::command::{Action, CommandHandler};
use crate::error::EarshotError;
use crate::session::SessionListener;
use owo_colors::OwoColorize;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Clear the current terminal line (replaces a pending partial)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Prints finals to stdout and everything else to stderr.
///
/// Partials are redrawn in place on a terminal; in quiet mode only finals
/// are printed.
pub struct TerminalListener {
    quiet: bool,
    interactive: bool,
    partial_shown: AtomicBool,
}

impl TerminalListener {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            interactive: io::stderr().is_terminal(),
            partial_shown: AtomicBool::new(false),
        }
    }

    fn clear_partial(&self) {
        if self.partial_shown.swap(false, Ordering::SeqCst) {
            clear_line();
        }
    }
}

impl SessionListener for TerminalListener {
    fn on_ready(&self) {
        if !self.quiet {
            eprintln!("{} Model ready", "✓".green());
        }
    }

    fn on_partial_result(&self, text: &str) {
        if self.quiet || text.trim().is_empty() {
            return;
        }
        if self.interactive {
            clear_line();
            eprint!("{}", text.dimmed());
            if let Err(e) = io::stderr().flush() {
                debug!(error = %e, "Failed to flush stderr");
            }
            self.partial_shown.store(true, Ordering::SeqCst);
        } else {
            eprintln!("{} {}", "…".dimmed(), text.dimmed());
        }
    }

    fn on_final_result(&self, text: &str) {
        self.clear_partial();
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", text) {
            eprintln!("earshot: failed to write transcript: {e}");
        }
    }

    fn on_error(&self, error: &EarshotError) {
        self.clear_partial();
        eprintln!("{} {}", "error:".red().bold(), error);
    }
}

/// Reports routed commands on stderr.
#[derive(Debug, Default)]
pub struct PrintingHandler;

impl CommandHandler for PrintingHandler {
    fn handle(&self, action: Action, text: &str) {
        if action == Action::Unknown {
            eprintln!("  {} {}", "?".yellow(), text.dimmed());
        } else {
            eprintln!("  {} {}", "→".cyan(), action.bold());
        }
    }
}
