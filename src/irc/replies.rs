//! Outbound reply formatting.
//!
//! [`Reply::line`] is a pure function from a reply kind and the recipient's
//! context (server name, recipient nick) to one wire line, without the
//! trailing CRLF (the writer appends it). Numeric replies carry the server
//! name as source prefix and the recipient's nick; relayed commands (JOIN,
//! PART, NICK, PRIVMSG, KICK) carry the acting client's nick instead and
//! read the same for every recipient.

/// One formatted reply kind. Field names follow the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// 001, sent once on registration.
    Welcome,
    Join { nick: String, channel: String },
    Part { nick: String, channel: String, reason: String },
    /// 332
    Topic { channel: String, topic: String },
    /// 331
    NoTopic { channel: String },
    /// 353, one chunk of the names list.
    Names { channel: String, nicks: String },
    /// 366
    EndOfNames { channel: String },
    NickChange { old: String, new: String },
    Kill { by: String, reason: String },
    Msg { from: String, target: String, text: String },
    /// 322, one listed channel.
    List { item: String },
    /// 323
    ListEnd,
    /// 381
    Oper,
    /// 324
    ChannelModeIs { channel: String, flags: String, params: String },
    Kick { by: String, channel: String, nick: String, reason: String },
    /// 371
    Info { text: String },
    /// 351
    Version { version: String },
    /// 375
    MotdStart,
    /// 372, one MOTD line.
    Motd { line: String },
    /// 376
    EndOfMotd,
    Pong,
    /// 461
    ErrMoreArgs,
    /// 431
    ErrNoNick,
    /// 432
    ErrInvalidNick { nick: String },
    /// 433
    ErrNickInUse { nick: String },
    /// 462
    ErrAlreadyReg,
    /// 401
    ErrNoSuchNick { name: String },
    /// 421
    ErrUnknownCommand { verb: String },
    /// 451
    ErrNotReg,
    /// 464
    ErrPassword,
    /// 481
    ErrNoPriv,
    /// 404
    ErrCannotSend { channel: String },
}

impl Reply {
    /// Format this reply as one wire line for the given recipient.
    ///
    /// `server` is the server's advertised name, `nick` the recipient's
    /// current display nick; both are ignored by the relayed-command kinds.
    pub fn line(&self, server: &str, nick: &str) -> String {
        match self {
            Reply::Welcome => {
                format!(":{server} 001 {nick} :Welcome to {server}")
            }
            Reply::Join { nick: from, channel } => {
                format!(":{from} JOIN {channel}")
            }
            Reply::Part { nick: from, channel, reason } => {
                format!(":{from} PART {channel} {reason}")
            }
            Reply::Topic { channel, topic } => {
                format!(":{server} 332 {nick} {channel} :{topic}")
            }
            Reply::NoTopic { channel } => {
                format!(":{server} 331 {nick} {channel} :No topic is set")
            }
            Reply::Names { channel, nicks } => {
                format!(":{server} 353 {nick} = {channel} :{nicks}")
            }
            Reply::EndOfNames { channel } => {
                format!(":{server} 366 {nick} {channel} :End of NAMES list")
            }
            Reply::NickChange { old, new } => {
                format!(":{old} NICK {new}")
            }
            Reply::Kill { by, reason } => {
                format!(":{by} KILL {nick} A {reason}")
            }
            Reply::Msg { from, target, text } => {
                format!(":{from} PRIVMSG {target} :{text}")
            }
            Reply::List { item } => {
                format!(":{server} 322 {nick} {item}")
            }
            Reply::ListEnd => {
                format!(":{server} 323 {nick}")
            }
            Reply::Oper => {
                format!(":{server} 381 {nick} :You are now an operator")
            }
            Reply::ChannelModeIs { channel, flags, params } => {
                format!(":{server} 324 {nick} {channel} {flags} {params}")
            }
            Reply::Kick { by, channel, nick: kicked, reason } => {
                format!(":{by} KICK {channel} {kicked} {reason}")
            }
            Reply::Info { text } => {
                format!(":{server} 371 {nick} :{text}")
            }
            Reply::Version { version } => {
                format!(":{server} 351 {nick} {version}")
            }
            Reply::MotdStart => {
                format!(":{server} 375 {nick} :- Message of the day - ")
            }
            Reply::Motd { line } => {
                format!(":{server} 372 {nick} :- {line}")
            }
            Reply::EndOfMotd => {
                format!(":{server} 376 {nick} :End of MOTD Command")
            }
            Reply::Pong => {
                format!(":{server} PONG {nick} {server}")
            }
            Reply::ErrMoreArgs => {
                format!(":{server} 461 {nick} :Not enough params")
            }
            Reply::ErrNoNick => {
                format!(":{server} 431 {nick} :No nickname given")
            }
            Reply::ErrInvalidNick { nick: bad } => {
                format!(":{server} 432 {nick} {bad} :Erronenous nickname")
            }
            Reply::ErrNickInUse { nick: bad } => {
                format!(":{server} 433 {nick} {bad} :Nick already in use")
            }
            Reply::ErrAlreadyReg => {
                format!(":{server} 462 :You need a valid nick first")
            }
            Reply::ErrNoSuchNick { name } => {
                format!(":{server} 401 {nick} {name} :No such nick/channel")
            }
            Reply::ErrUnknownCommand { verb } => {
                format!(":{server} 421 {nick} {verb} :Unknown command")
            }
            Reply::ErrNotReg => {
                format!(":{server} 451 :You have not registered")
            }
            Reply::ErrPassword => {
                format!(":{server} 464 {nick} :Error, password incorrect")
            }
            Reply::ErrNoPriv => {
                format!(":{server} 481 {nick} :Permission denied")
            }
            Reply::ErrCannotSend { channel } => {
                format!(":{server} 404 {nick} {channel} :Cannot send to channel")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(reply: Reply) -> String {
        reply.line("oxbow", "wren")
    }

    #[test]
    fn welcome() {
        assert_eq!(fmt(Reply::Welcome), ":oxbow 001 wren :Welcome to oxbow");
    }

    #[test]
    fn join_carries_acting_nick() {
        let reply = Reply::Join {
            nick: "heron".into(),
            channel: "#reeds".into(),
        };
        assert_eq!(fmt(reply), ":heron JOIN #reeds");
    }

    #[test]
    fn part_reason_is_not_trailing() {
        let reply = Reply::Part {
            nick: "heron".into(),
            channel: "#reeds".into(),
            reason: "bye".into(),
        };
        assert_eq!(fmt(reply), ":heron PART #reeds bye");
    }

    #[test]
    fn topic_pair() {
        let topic = Reply::Topic {
            channel: "#reeds".into(),
            topic: "water levels".into(),
        };
        assert_eq!(fmt(topic), ":oxbow 332 wren #reeds :water levels");

        let none = Reply::NoTopic {
            channel: "#reeds".into(),
        };
        assert_eq!(fmt(none), ":oxbow 331 wren #reeds :No topic is set");
    }

    #[test]
    fn names_pair() {
        let names = Reply::Names {
            channel: "#reeds".into(),
            nicks: "@heron +wren crake".into(),
        };
        assert_eq!(fmt(names), ":oxbow 353 wren = #reeds :@heron +wren crake");

        let end = Reply::EndOfNames {
            channel: "#reeds".into(),
        };
        assert_eq!(fmt(end), ":oxbow 366 wren #reeds :End of NAMES list");
    }

    #[test]
    fn nick_change() {
        let reply = Reply::NickChange {
            old: "wren".into(),
            new: "wren2".into(),
        };
        assert_eq!(fmt(reply), ":wren NICK wren2");
    }

    #[test]
    fn kill() {
        let reply = Reply::Kill {
            by: "oxbow".into(),
            reason: "Your nickname is already being used".into(),
        };
        assert_eq!(
            fmt(reply),
            ":oxbow KILL wren A Your nickname is already being used"
        );
    }

    #[test]
    fn privmsg_reintroduces_colon() {
        let reply = Reply::Msg {
            from: "heron".into(),
            target: "#reeds".into(),
            text: "hello".into(),
        };
        assert_eq!(fmt(reply), ":heron PRIVMSG #reeds :hello");
    }

    #[test]
    fn list_pair() {
        let item = Reply::List {
            item: "#reeds 3 :water levels".into(),
        };
        assert_eq!(fmt(item), ":oxbow 322 wren #reeds 3 :water levels");
        assert_eq!(fmt(Reply::ListEnd), ":oxbow 323 wren");
    }

    #[test]
    fn oper() {
        assert_eq!(fmt(Reply::Oper), ":oxbow 381 wren :You are now an operator");
    }

    #[test]
    fn channel_mode_is_keeps_space_for_empty_params() {
        let reply = Reply::ChannelModeIs {
            channel: "#reeds".into(),
            flags: "+stn".into(),
            params: String::new(),
        };
        assert_eq!(fmt(reply), ":oxbow 324 wren #reeds +stn ");
    }

    #[test]
    fn kick() {
        let reply = Reply::Kick {
            by: "heron".into(),
            channel: "#reeds".into(),
            nick: "crake".into(),
            reason: "rude".into(),
        };
        assert_eq!(fmt(reply), ":heron KICK #reeds crake rude");
    }

    #[test]
    fn motd_sequence() {
        assert_eq!(fmt(Reply::MotdStart), ":oxbow 375 wren :- Message of the day - ");
        assert_eq!(
            fmt(Reply::Motd { line: "hi".into() }),
            ":oxbow 372 wren :- hi"
        );
        assert_eq!(fmt(Reply::EndOfMotd), ":oxbow 376 wren :End of MOTD Command");
    }

    #[test]
    fn info_and_version() {
        assert_eq!(
            fmt(Reply::Info { text: "oxbow chat relay".into() }),
            ":oxbow 371 wren :oxbow chat relay"
        );
        assert_eq!(
            fmt(Reply::Version { version: "oxbow-0.1.0".into() }),
            ":oxbow 351 wren oxbow-0.1.0"
        );
    }

    #[test]
    fn pong() {
        assert_eq!(fmt(Reply::Pong), ":oxbow PONG wren oxbow");
    }

    #[test]
    fn error_table() {
        assert_eq!(fmt(Reply::ErrMoreArgs), ":oxbow 461 wren :Not enough params");
        assert_eq!(fmt(Reply::ErrNoNick), ":oxbow 431 wren :No nickname given");
        assert_eq!(
            fmt(Reply::ErrInvalidNick { nick: "1bad".into() }),
            ":oxbow 432 wren 1bad :Erronenous nickname"
        );
        assert_eq!(
            fmt(Reply::ErrNickInUse { nick: "heron".into() }),
            ":oxbow 433 wren heron :Nick already in use"
        );
        assert_eq!(fmt(Reply::ErrAlreadyReg), ":oxbow 462 :You need a valid nick first");
        assert_eq!(
            fmt(Reply::ErrNoSuchNick { name: "ghost".into() }),
            ":oxbow 401 wren ghost :No such nick/channel"
        );
        assert_eq!(
            fmt(Reply::ErrUnknownCommand { verb: "FLY".into() }),
            ":oxbow 421 wren FLY :Unknown command"
        );
        assert_eq!(fmt(Reply::ErrNotReg), ":oxbow 451 :You have not registered");
        assert_eq!(fmt(Reply::ErrPassword), ":oxbow 464 wren :Error, password incorrect");
        assert_eq!(fmt(Reply::ErrNoPriv), ":oxbow 481 wren :Permission denied");
        assert_eq!(
            fmt(Reply::ErrCannotSend { channel: "#reeds".into() }),
            ":oxbow 404 wren #reeds :Cannot send to channel"
        );
    }
}
