//! ANSI escape and prompt handling for interpreter output
//!
//! `bluetoothctl` in interactive mode colours its event tags (`[CHG]`,
//! `[NEW]`, `[DEL]`), redraws its prompt with `\r\x1b[K` and prefixes echoed
//! lines with a prompt such as `[bluetooth]# ` or `[MyHeadphones]# `.
//! None of that is useful for parsing.

use regex::Regex;
use std::sync::LazyLock;

/// Regex pattern for ANSI escape sequences.
///
/// Covers:
/// - CSI sequences: ESC [ ... letter (colors, cursor, line erase)
/// - OSC sequences: ESC ] ... BEL or ST
/// - Simple escapes: ESC letter
/// - readline's invisible-text markers (\x01 / \x02)
static ANSI_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \x1b\[[0-9;?]*[A-Za-z]               # CSI sequences
        | \x1b\][^\x07\x1b]*(?:\x07|\x1b\\)  # OSC sequences
        | \x1b[A-Za-z]                       # Simple escapes
        | [\x01\x02]                         # readline prompt markers
        ",
    )
    .expect("ANSI regex pattern is valid")
});

/// Interactive prompt at the start of a line: `[bluetooth]# ` or `[Device Name]> `.
static PROMPT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]\n]*\][#>]\s?").expect("Prompt regex pattern is valid"));

/// Strip all ANSI escape sequences from a string.
///
/// # Examples
///
/// ```
/// use bluelink_core::strip_ansi_codes;
///
/// let input = "[\x1b[0;93mCHG\x1b[0m] Device AA:BB:CC:DD:EE:FF Connected: yes";
/// assert_eq!(strip_ansi_codes(input), "[CHG] Device AA:BB:CC:DD:EE:FF Connected: yes");
/// ```
pub fn strip_ansi_codes(input: &str) -> String {
    ANSI_ESCAPE_PATTERN.replace_all(input, "").into_owned()
}

/// Normalize one line of interpreter output.
///
/// Keeps only the text after the last carriage return (the interpreter
/// redraws its prompt in place), strips escape codes, then drops any leading
/// prompts. Returns an empty string for prompt-only lines.
pub fn clean_line(line: &str) -> String {
    let visible = line.rsplit('\r').find(|s| !s.trim().is_empty()).unwrap_or("");
    let mut cleaned = strip_ansi_codes(visible);

    while let Some(m) = PROMPT_PATTERN.find(&cleaned) {
        cleaned = cleaned[m.end()..].to_string();
    }

    cleaned.trim_end().to_string()
}
