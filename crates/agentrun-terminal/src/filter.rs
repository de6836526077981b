//! Terminal control-sequence filtering for interactive output
//!
//! Raw pseudo-terminal output carries cursor/colour escapes, window-title
//! updates and shell-integration markers injected by terminal emulators. None of
//! that is useful to the session UI, so it is stripped before a chunk is surfaced.
//! For plain terminals the echo of the last submitted command (and the prompt
//! redraw that follows it) is suppressed as well.
//!
//! Everything here is data-in/data-out. A sequence split across two chunks is
//! not recognised by these functions; the readers use [`crate::chunk::ChunkAssembler`]
//! to hold back incomplete trailing sequences instead.

use regex::Regex;
use std::sync::OnceLock;

/// Characters that commonly terminate a shell prompt
const PROMPT_CHARS: &[char] = &['$', '#', '%', '>', '❯', '➜', '»', 'λ'];

/// Longest line still considered a prompt redraw
const MAX_PROMPT_LEN: usize = 160;

/// Result of filtering one chunk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilteredChunk {
    pub text: String,
    /// The echo of the last submitted command was found and removed
    pub echo_suppressed: bool,
}

impl FilteredChunk {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

fn control_sequence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            // OSC introduced by ESC, terminated by BEL or ST
            r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
            // Shell-integration OSC that lost its ESC
            r"|\](?:0|1|2|6|7|133|633|697|1337);[^\x07\x1b\n]*(?:\x07|\x1b\\)",
            // DCS / PM / APC strings
            r"|\x1b[P^_][^\x1b]*\x1b\\",
            // CSI
            r"|\x1b\[[0-?]*[ -/]*[@-~]",
            // Charset designation
            r"|\x1b[()*+][0-9A-Za-z]",
            // Two-byte escapes (keypad mode, save/restore cursor, index, reset)
            r"|\x1b[=>78DEHMNOZc]",
            // Stray bell
            r"|\x07",
        ))
        .expect("control sequence pattern is valid")
    })
}

fn shell_integration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b?\](?:0|1|2|7|133|633|697|1337);[^\x07\x1b]*(?:\x07|\x1b\\)")
            .expect("shell integration pattern is valid")
    })
}

/// Remove every ANSI/OSC control sequence from `text`
pub fn strip_control_sequences(text: &str) -> String {
    control_sequence_regex().replace_all(text, "").into_owned()
}

/// Remove only window-title and shell-integration OSC sequences
///
/// Used for one-shot command output, which keeps its colours.
pub fn strip_shell_integration(text: &str) -> String {
    shell_integration_regex().replace_all(text, "").into_owned()
}

/// Filter one raw interactive chunk
///
/// `plain_terminal` enables echo suppression against `last_command`; interactive
/// agents draw their own input line and never need it.
pub fn filter_output(raw: &str, last_command: Option<&str>, plain_terminal: bool) -> FilteredChunk {
    let stripped = strip_control_sequences(raw);

    let command = last_command
        .filter(|_| plain_terminal)
        .and_then(|cmd| cmd.lines().next())
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty());

    match command.and_then(|cmd| suppress_echo(&stripped, cmd)) {
        Some(rest) => FilteredChunk {
            text: rest,
            echo_suppressed: true,
        },
        None => FilteredChunk {
            text: stripped,
            echo_suppressed: false,
        },
    }
}

/// Drop a leading echo of `command` and the prompt redraw right after it.
/// Returns `None` when the chunk does not start with the echo.
///
/// Only lines that repeat the echo, repeat the prompt seen in front of it, or
/// form an unterminated trailing prompt are dropped. Anything else is output.
fn suppress_echo(text: &str, command: &str) -> Option<String> {
    let mut lines = text.split_inclusive('\n').peekable();

    while lines.peek().is_some_and(|line| line.trim().is_empty()) {
        lines.next();
    }

    let first = lines.next()?;
    let prompt = echo_prompt(first, command)?;

    while lines.peek().is_some_and(|line| {
        echo_prompt(line, command).is_some()
            || (!prompt.is_empty() && line.trim() == prompt)
            || is_trailing_prompt(line)
    }) {
        lines.next();
    }

    Some(lines.collect())
}

/// Prompt in front of an echoed command (empty for a bare echo), or `None`
/// when `line` is not an echo of `command`
fn echo_prompt<'a>(line: &'a str, command: &str) -> Option<&'a str> {
    let line = line.trim();
    if line == command {
        return Some("");
    }
    let prefix = line.strip_suffix(command)?.trim_end();
    let is_prompt = prefix.ends_with(PROMPT_CHARS) && prefix.chars().count() <= MAX_PROMPT_LEN;
    is_prompt.then_some(prefix)
}

/// A prompt waiting for input: the last, newline-less line of a chunk ending
/// in a prompt character and a space
fn is_trailing_prompt(line: &str) -> bool {
    if line.ends_with('\n') || !line.ends_with(' ') {
        return false;
    }
    let body = line.trim();
    !body.is_empty() && body.chars().count() <= MAX_PROMPT_LEN && body.ends_with(PROMPT_CHARS)
}
