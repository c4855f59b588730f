//! Output rendering for the chat application.
//!
//! Replies arrive as markdown. The plain-text renderer shows them as light
//! terminal markdown: fenced code is colored and tagged with its language and
//! headings are bold. Everything else passes through untouched.

use std::io::{self, Stdout, Write};

/// ANSI escape code for bold text (used for headings).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for code fences and status lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for code block language tags).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for code block bodies).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a complete assistant reply.
    fn print_reply(&mut self, reply: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a transient status line such as `Thinking...`.
    fn print_status(&mut self, status: &str) {
        self.print_info(status);
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    pub fn use_color(&self) -> bool {
        self.use_color
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_reply(&mut self, reply: &str) {
        println!("{}", format_markdown(reply, self.use_color));
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            eprintln!("{ANSI_RED}{error}{ANSI_RESET}");
        } else {
            eprintln!("{error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        println!("{info}");
        self.flush();
    }

    fn print_status(&mut self, status: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{status}{ANSI_RESET}");
        } else {
            println!("{status}");
        }
        self.flush();
    }
}

/// Renders markdown for a terminal.
///
/// With color disabled the text is returned unchanged.
pub fn format_markdown(text: &str, use_color: bool) -> String {
    if !use_color {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 64);
    let mut in_code = false;
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let trimmed = line.trim_start();
        if let Some(tag) = trimmed.strip_prefix("```") {
            if in_code {
                out.push_str(&format!("{ANSI_DIM}```{ANSI_RESET}"));
            } else {
                let tag = tag.trim();
                if tag.is_empty() {
                    out.push_str(&format!("{ANSI_DIM}```{ANSI_RESET}"));
                } else {
                    out.push_str(&format!("{ANSI_DIM}```{ANSI_RESET}{ANSI_CYAN}{tag}{ANSI_RESET}"));
                }
            }
            in_code = !in_code;
        } else if in_code {
            out.push_str(&format!("{ANSI_YELLOW}{line}{ANSI_RESET}"));
        } else if let Some(heading) = heading_text(line) {
            out.push_str(&format!("{ANSI_BOLD}{heading}{ANSI_RESET}"));
        } else {
            out.push_str(line);
        }
    }
    out
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(' ').map(str::trim)
}
