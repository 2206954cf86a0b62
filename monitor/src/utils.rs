use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current UTC timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// One player per non-blank line of a player-list response
pub fn count_player_lines(body: &str) -> u32 {
    body.lines().filter(|line| !line.trim().is_empty()).count() as u32
}

// Servers answer commands they do not know with "Unknown command: <cmd>"
pub fn is_unknown_command_reply(body: &str) -> bool {
    body.trim_start()
        .to_ascii_lowercase()
        .starts_with("unknown command")
}

// Saturating milliseconds for metrics
pub fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_advances() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }

    #[test]
    fn test_count_player_lines() {
        assert_eq!(count_player_lines(""), 0);
        assert_eq!(count_player_lines("PlayerA\nPlayerB"), 2);
        assert_eq!(count_player_lines("PlayerA\n\n  \nPlayerB\n"), 2);
    }

    #[test]
    fn test_unknown_command_reply() {
        assert!(is_unknown_command_reply("Unknown command: listplayers"));
        assert!(is_unknown_command_reply("  unknown command 'players'"));
        assert!(!is_unknown_command_reply("PlayerA\nPlayerB"));
        assert!(!is_unknown_command_reply(""));
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(Duration::from_millis(45)), 45);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
