//! Signal-name parsing for `kill`.

/// Default signal when the caller gives none or an unknown name.
pub const SIGKILL: i32 = 9;

/// Translate a signal spelling (`KILL`, `SIGKILL`, `9`) into its number.
/// Unknown names fall back to SIGKILL, matching the daemon's kill
/// semantics rather than erroring on exotic spellings.
pub fn parse_signal(name: &str) -> i32 {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return SIGKILL;
    }
    if let Ok(n) = trimmed.parse::<i32>() {
        if n > 0 {
            return n;
        }
    }
    let upper = trimmed.to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    match short {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "KILL" => 9,
        "USR1" => 10,
        "USR2" => 12,
        "ALRM" => 14,
        "TERM" => 15,
        "CONT" => 18,
        "STOP" => 19,
        "TSTP" => 20,
        "TTIN" => 21,
        "TTOU" => 22,
        _ => SIGKILL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_with_and_without_prefix() {
        assert_eq!(parse_signal("SIGTERM"), 15);
        assert_eq!(parse_signal("term"), 15);
        assert_eq!(parse_signal("SIGHUP"), 1);
        assert_eq!(parse_signal("USR2"), 12);
        assert_eq!(parse_signal("SIGSTOP"), 19);
    }

    #[test]
    fn numbers_pass_through() {
        assert_eq!(parse_signal("2"), 2);
        assert_eq!(parse_signal("15"), 15);
    }

    #[test]
    fn unknown_falls_back_to_sigkill() {
        assert_eq!(parse_signal("SIGPOWER"), SIGKILL);
        assert_eq!(parse_signal(""), SIGKILL);
        assert_eq!(parse_signal("-3"), SIGKILL);
    }
}
