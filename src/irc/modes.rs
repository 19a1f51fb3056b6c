//! Channel and member mode flags, plus the MODE change-string parser.

/// Per-member, per-channel flags. Serialises to a one-character names-list
/// prefix; operator wins when both are set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberMode {
    pub operator: bool,
    pub voice: bool,
}

impl MemberMode {
    pub fn prefix(self) -> &'static str {
        if self.operator {
            "@"
        } else if self.voice {
            "+"
        } else {
            ""
        }
    }
}

/// Channel-wide flags. New channels start secret, topic-locked, and closed
/// to external senders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMode {
    pub secret: bool,
    pub topic_locked: bool,
    pub no_external: bool,
    /// Membership key (`+k`); checked on JOIN.
    pub key: Option<String>,
    /// Member cap (`+l`); checked on JOIN.
    pub limit: Option<usize>,
}

impl ChannelMode {
    /// The `+`-flag string for a 324 reply, flags in `stnkl` order.
    pub fn flag_string(&self) -> String {
        let mut flags = String::from("+");
        if self.secret {
            flags.push('s');
        }
        if self.topic_locked {
            flags.push('t');
        }
        if self.no_external {
            flags.push('n');
        }
        if self.key.is_some() {
            flags.push('k');
        }
        if self.limit.is_some() {
            flags.push('l');
        }
        flags
    }

    /// The parameter column for a 324 reply: key then limit.
    pub fn param_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(key) = &self.key {
            params.push(key.clone());
        }
        if let Some(limit) = self.limit {
            params.push(limit.to_string());
        }
        params.join(" ")
    }
}

/// One parsed mode change from a `MODE <chan> <flags> [args]` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeChange {
    Secret(bool),
    TopicLocked(bool),
    NoExternal(bool),
    /// Grant or revoke channel-operator status for a nick.
    Operator(bool, String),
    /// Grant or revoke voice for a nick.
    Voice(bool, String),
    /// Set (`+k <key>`) or clear (`-k`) the membership key.
    Key(Option<String>),
    /// Set (`+l <n>`) or clear (`-l`) the member cap.
    Limit(Option<usize>),
}

/// Parse a flag string like `+o-v` against its positional arguments.
///
/// `o` and `v` always consume an argument; `k` and `l` consume one only
/// when setting. Changes missing their argument, and unknown flag
/// characters, are dropped silently.
pub fn parse_changes(flags: &str, args: &[String]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut adding = true;
    let mut args = args.iter();

    for c in flags.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            's' => changes.push(ModeChange::Secret(adding)),
            't' => changes.push(ModeChange::TopicLocked(adding)),
            'n' => changes.push(ModeChange::NoExternal(adding)),
            'o' => {
                if let Some(nick) = args.next() {
                    changes.push(ModeChange::Operator(adding, nick.clone()));
                }
            }
            'v' => {
                if let Some(nick) = args.next() {
                    changes.push(ModeChange::Voice(adding, nick.clone()));
                }
            }
            'k' => {
                if !adding {
                    changes.push(ModeChange::Key(None));
                } else if let Some(key) = args.next() {
                    changes.push(ModeChange::Key(Some(key.clone())));
                }
            }
            'l' => {
                if !adding {
                    changes.push(ModeChange::Limit(None));
                } else if let Some(limit) = args.next().and_then(|a| a.parse().ok()) {
                    changes.push(ModeChange::Limit(Some(limit)));
                }
            }
            _ => {}
        }
    }

    changes
}
