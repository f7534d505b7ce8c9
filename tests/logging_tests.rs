use devgate::logging::{parse_line_level, parse_log_level, set_web_log_level, should_emit_to_web};
use tracing::Level;

#[test]
fn should_emit_filters_below_runtime_level() {
    // Set runtime level to WARN, INFO lines should be filtered out, ERROR should pass
    set_web_log_level(Level::WARN);
    assert!(!should_emit_to_web(" INFO message"));
    assert!(should_emit_to_web(" ERROR something"));
}

#[test]
fn level_names_parse_case_insensitively() {
    assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
    assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
    assert!(parse_log_level("loud").is_err());
    assert_eq!(parse_line_level("2025-01-01T00:00:00Z  WARN devgate: x"), Some(Level::WARN));
}
