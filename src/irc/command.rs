//! Inbound command tokenisation.
//!
//! One protocol line becomes a verb plus positional arguments:
//!
//!   [`:`source SP] verb [SP args...] [SP `:`trailing]
//!
//! The line is split on runs of whitespace. A leading `:`-prefixed token is
//! a source prefix and is discarded (the server decides who said what). The
//! first remaining token is upper-cased to form the verb. If any later
//! token begins with `:`, it and every token after it are folded into one
//! trailing argument joined by single spaces.

/// A tokenised inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb, upper-cased (e.g. `PRIVMSG`, `JOIN`).
    pub verb: String,
    /// Positional arguments; a trailing argument is the last entry.
    pub args: Vec<String>,
}

impl Command {
    /// Tokenise a single line. Returns `None` for lines with no verb.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().peekable();

        if tokens.peek().is_some_and(|t| t.starts_with(':')) {
            tokens.next();
        }

        let verb = tokens.next()?.to_uppercase();

        let mut args = Vec::new();
        while let Some(token) = tokens.next() {
            if let Some(stripped) = token.strip_prefix(':') {
                // Trailing argument: everything from here on, single-spaced.
                let mut trailing = stripped.to_owned();
                for rest in tokens.by_ref() {
                    trailing.push(' ');
                    trailing.push_str(rest);
                }
                args.push(trailing);
                break;
            }
            args.push(token.to_owned());
        }

        Some(Command { verb, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_bare_verb() {
        let cmd = Command::parse("QUIT").unwrap();
        assert_eq!(cmd.verb, "QUIT");
        assert_eq!(cmd.args, Vec::<String>::new());
    }

    #[test]
    fn parse_verb_with_args() {
        let cmd = Command::parse("MODE #reeds +o wren").unwrap();
        assert_eq!(cmd.verb, "MODE");
        assert_eq!(cmd.args, vec!["#reeds", "+o", "wren"]);
    }

    #[test]
    fn parse_upper_cases_verb() {
        let cmd = Command::parse("join #reeds").unwrap();
        assert_eq!(cmd.verb, "JOIN");
        assert_eq!(cmd.args, vec!["#reeds"]);
    }

    #[test]
    fn parse_discards_source_prefix() {
        let cmd = Command::parse(":wren!u@h PRIVMSG #reeds :hello").unwrap();
        assert_eq!(cmd.verb, "PRIVMSG");
        assert_eq!(cmd.args, vec!["#reeds", "hello"]);
    }

    #[test]
    fn parse_folds_trailing_argument() {
        let cmd = Command::parse("PRIVMSG #reeds :hello there friends").unwrap();
        assert_eq!(cmd.args, vec!["#reeds", "hello there friends"]);
    }

    #[test]
    fn parse_collapses_whitespace_runs() {
        let cmd = Command::parse("PRIVMSG   #reeds   :hello    there").unwrap();
        assert_eq!(cmd.args, vec!["#reeds", "hello there"]);
    }

    #[test]
    fn parse_empty_trailing() {
        // A lone `:` clears a topic; it must survive as an empty argument.
        let cmd = Command::parse("TOPIC #reeds :").unwrap();
        assert_eq!(cmd.args, vec!["#reeds", ""]);
    }

    #[test]
    fn parse_trailing_starting_with_colon() {
        let cmd = Command::parse("PRIVMSG #reeds ::)").unwrap();
        assert_eq!(cmd.args, vec!["#reeds", ":)"]);
    }

    #[test]
    fn parse_empty_line() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn parse_prefix_only() {
        assert_eq!(Command::parse(":wren!u@h"), None);
    }

    #[test]
    fn parse_user_registration() {
        let cmd = Command::parse("USER wren 0 * :Wren the Small").unwrap();
        assert_eq!(cmd.verb, "USER");
        assert_eq!(cmd.args, vec!["wren", "0", "*", "Wren the Small"]);
    }
}
