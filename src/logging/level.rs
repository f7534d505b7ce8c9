use crate::error::{GatewayError, Result};
use tracing::Level;

pub fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.trim().to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(GatewayError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

pub fn level_rank(level: Level) -> u8 {
    match level {
        Level::TRACE => 0,
        Level::DEBUG => 1,
        Level::INFO => 2,
        Level::WARN => 3,
        Level::ERROR => 4,
    }
}

/// The more verbose of two levels
pub fn min_level(a: Level, b: Level) -> Level {
    if level_rank(a) <= level_rank(b) { a } else { b }
}

const LEVELS: [(Level, &str); 5] = [
    (Level::TRACE, "TRACE"),
    (Level::DEBUG, "DEBUG"),
    (Level::INFO, "INFO"),
    (Level::WARN, "WARN"),
    (Level::ERROR, "ERROR"),
];

/// Try to parse a level out of a formatted log line (JSON or plain)
pub fn parse_line_level(line: &str) -> Option<Level> {
    let line = strip_ansi_codes(line);
    LEVELS
        .iter()
        .find(|(_, name)| line.contains(&format!("\"level\":\"{}\"", name)))
        .or_else(|| {
            LEVELS
                .iter()
                .find(|(_, name)| line.contains(&format!(" {} ", name)))
        })
        .map(|(level, _)| *level)
}

fn strip_ansi_codes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
    }
    out
}

pub fn set_web_log_level_str(level_str: &str) -> Result<()> {
    let lvl = parse_log_level(level_str)?;
    super::state::set_web_log_level(lvl);
    Ok(())
}

/// Whether a formatted line passes the current runtime web level
pub fn should_emit_to_web(line: &str) -> bool {
    let current = super::state::get_web_log_level();
    match parse_line_level(line) {
        Some(line_lvl) => level_rank(line_lvl) >= level_rank(current),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_from_plain_json_and_colored_lines() {
        assert_eq!(
            parse_line_level("2025-01-01T00:00:00Z  WARN component=gateway: slow"),
            Some(Level::WARN)
        );
        assert_eq!(
            parse_line_level(r#"{"timestamp":"x","level":"DEBUG","fields":{}}"#),
            Some(Level::DEBUG)
        );
        assert_eq!(
            parse_line_level("2025 \u{1b}[32m INFO\u{1b}[0m device=meter: ok"),
            Some(Level::INFO)
        );
        assert_eq!(parse_line_level("no level here"), None);
    }

    #[test]
    fn min_level_prefers_verbose() {
        assert_eq!(min_level(Level::INFO, Level::DEBUG), Level::DEBUG);
        assert_eq!(min_level(Level::ERROR, Level::WARN), Level::WARN);
    }
}
