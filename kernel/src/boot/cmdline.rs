//! Command-line parsing (spec §6).
//!
//! The line is a sequence of space-separated `-key=value` tokens. The only
//! key this core recognizes is `console`, whose value is a comma-separated
//! list: first element is a sink type (`debugcon` or `serial`), followed by
//! type-specific values. Unknown keys are ignored silently (testable
//! scenario 6) — the registry is a single match arm, not a panic-on-miss.

use alloc::string::String;
use alloc::vec::Vec;

use crate::console::ConsoleSink;

#[derive(Debug, Default, Clone)]
pub struct ParsedCmdline {
    pub console: Option<ConsoleSink>,
}

/// Parses an integer with the standard "optional base prefix" rules:
/// `0x`/`0X` for hex, `0o`/`0O` for octal, `0b`/`0B` for binary, otherwise
/// decimal.
fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(rest, 16).ok()
    } else if let Some(rest) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        u64::from_str_radix(rest, 8).ok()
    } else if let Some(rest) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u64::from_str_radix(rest, 2).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

fn parse_console_value(value: &str) -> Option<ConsoleSink> {
    let parts: Vec<&str> = value.split(',').collect();
    match parts.as_slice() {
        ["debugcon", port] => {
            let port = parse_int(port)?;
            Some(ConsoleSink::DebugCon {
                port: u16::try_from(port).ok()?,
            })
        }
        ["serial", port, baud] => {
            let port = parse_int(port)?;
            let baud = parse_int(baud)?;
            Some(ConsoleSink::Serial {
                port: u16::try_from(port).ok()?,
                baud: u32::try_from(baud).ok()?,
            })
        }
        _ => None,
    }
}

/// Parses a full command line. Never panics: a malformed or unrecognized
/// token is simply dropped.
pub fn parse(line: &str) -> ParsedCmdline {
    let mut out = ParsedCmdline::default();
    for token in line.split_whitespace() {
        let Some(token) = token.strip_prefix('-') else {
            continue;
        };
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "console" => {
                if let Some(sink) = parse_console_value(value) {
                    out.console = Some(sink);
                }
            }
            _ => { /* unrecognized key: ignored silently */ }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debugcon_port_is_parsed() {
        let parsed = parse("-console=debugcon,0xE9 -foo=bar");
        match parsed.console {
            Some(ConsoleSink::DebugCon { port }) => assert_eq!(port, 0xE9),
            other => panic!("expected DebugCon, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let parsed = parse("-foo=bar -baz=qux");
        assert!(parsed.console.is_none());
    }

    #[test]
    fn serial_port_and_baud_are_parsed() {
        let parsed = parse("-console=serial,0x3F8,115200");
        match parsed.console {
            Some(ConsoleSink::Serial { port, baud }) => {
                assert_eq!(port, 0x3F8);
                assert_eq!(baud, 115200);
            }
            other => panic!("expected Serial, got {other:?}"),
        }
    }

    #[test]
    fn malformed_value_is_dropped_not_fatal() {
        let parsed = parse("-console=nonsense");
        assert!(parsed.console.is_none());
    }

    #[test]
    fn empty_line_parses_to_defaults() {
        let parsed = parse("");
        assert!(parsed.console.is_none());
    }
}
