//! Prefix command parsing.

/// A recognised chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    /// Search terms, joined by single spaces. May be empty.
    Play(String),
    Help,
    Shutdown,
}

/// Parse `<prefix><verb> <args>`.
///
/// Returns `None` for messages without the prefix and for unknown verbs.
/// Verbs are case-insensitive.
pub fn parse(prefix: &str, content: &str) -> Option<Command> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let verb = words.next()?.to_lowercase();

    match verb.as_str() {
        "ping" => Some(Command::Ping),
        "play" => Some(Command::Play(words.collect::<Vec<_>>().join(" "))),
        "help" => Some(Command::Help),
        "shutdown" => Some(Command::Shutdown),
        _ => None,
    }
}

/// Reply to the help command.
pub fn help_text(prefix: &str) -> String {
    format!(
        "Available commands:\n\n\
         {prefix}ping: bot answers pong!\n\
         {prefix}play <query>: play the first match in your voice channel\n\
         {prefix}help: show this message\n\
         {prefix}shutdown: stop the bot"
    )
}

/// Reply to `play` without a query.
pub fn usage_play(prefix: &str) -> String {
    format!("Usage: {prefix}play <query>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(parse("!", "!ping"), Some(Command::Ping));
        assert_eq!(parse("!", "!help"), Some(Command::Help));
        assert_eq!(parse("!", "!shutdown"), Some(Command::Shutdown));
        assert_eq!(parse("!", "!PING"), Some(Command::Ping));
    }

    #[test]
    fn test_parse_play_joins_terms() {
        assert_eq!(
            parse("!", "!play  never   gonna give"),
            Some(Command::Play("never gonna give".into()))
        );
        assert_eq!(parse("!", "!play"), Some(Command::Play(String::new())));
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert_eq!(parse("!", "ping"), None);
        assert_eq!(parse("!", "!dance"), None);
        assert_eq!(parse("!", "!"), None);
        assert_eq!(parse("!", ""), None);
    }

    #[test]
    fn test_parse_multichar_prefix() {
        assert_eq!(parse("tc.", "tc.play foo"), Some(Command::Play("foo".into())));
        assert_eq!(parse("tc.", "!play foo"), None);
    }

    #[test]
    fn test_help_and_usage_use_prefix() {
        let help = help_text("?");
        assert!(help.starts_with("Available commands:"));
        assert!(help.contains("?play <query>"));
        assert_eq!(usage_play("!"), "Usage: !play <query>");
    }
}
