//! Server core: the accept loop, the dispatcher, and the protocol handlers.
//!
//! The dispatcher is one task consuming one global event queue. Handlers
//! run to completion, never block, and are the only code that mutates
//! [`ServerState`]; every observer therefore sees atomic state
//! transitions. Replies are enqueued on the target sessions' bounded
//! output queues without blocking; a session that cannot keep up is
//! dropped by its own harness.

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::command::Command;
use super::modes::{self, ModeChange};
use super::replies::Reply;
use super::session::{self, Event};
use super::state::{self, ConnId, ServerState, Session};

const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

const INFO_TEXT: &str = "oxbow, a multi-user chat relay";

/// Server identity and fixed replies; assembled by the embedder.
#[derive(Debug, Clone)]
pub struct Config {
    /// Advertised server name. Nicknames may not collide with it.
    pub name: String,
    /// Reported by VERSION.
    pub version: String,
    /// MOTD body lines, sent between 375 and 376.
    pub motd: Vec<String>,
    /// OPER password; `None` rejects every OPER attempt.
    pub oper_password: Option<String>,
}

impl Config {
    /// Defaults plus `OXBOW_SERVER_NAME` / `OXBOW_OPER_PASSWORD` overrides;
    /// the server name falls back to the process hostname.
    pub fn from_env() -> Self {
        let name = std::env::var("OXBOW_SERVER_NAME")
            .ok()
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
            .unwrap_or_else(|| "oxbow".to_owned());

        Config {
            name,
            version: VERSION.to_owned(),
            motd: vec![
                "Welcome to oxbow.".to_owned(),
                "Channels are #lower-case; be kind.".to_owned(),
            ],
            oper_password: std::env::var("OXBOW_OPER_PASSWORD").ok(),
        }
    }
}

/// Bind `addr` and serve until the listener fails.
pub async fn run(addr: &str, config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    serve(listener, config).await
}

/// Serve an already-bound listener: spawn the dispatcher, then hand every
/// accepted connection to its own session harness.
pub async fn serve(
    listener: TcpListener,
    config: Config,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(Dispatcher::new(config).run(event_rx));

    let mut next_id: ConnId = 0;
    loop {
        let (socket, addr) = listener.accept().await?;
        next_id += 1;
        info!(%addr, id = next_id, "new connection");
        session::spawn(socket, next_id, event_tx.clone());
    }
}

/// The single-threaded event consumer that owns all shared state.
pub struct Dispatcher {
    config: Config,
    state: ServerState,
}

impl Dispatcher {
    pub fn new(config: Config) -> Self {
        let state = ServerState::new(config.name.clone());
        Dispatcher { config, state }
    }

    /// Consume events until every producer is gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected { id, handle } => {
                debug!(id, "session connected");
                self.state.sessions.insert(id, Session::new(handle));
            }
            Event::Command { id, line } => {
                let Some(command) = Command::parse(&line) else {
                    return;
                };
                if self.state.sessions.contains_key(&id) {
                    self.dispatch(id, command);
                }
            }
            Event::Disconnected { id } => {
                debug!(id, "session disconnected");
                self.state.remove_session(id);
            }
        }
    }

    fn dispatch(&mut self, id: ConnId, command: Command) {
        let args = &command.args;
        match command.verb.as_str() {
            "NICK" => self.nick(id, args),
            "USER" => self.user(id),
            "JOIN" => self.join(id, args),
            "PART" => self.part(id, args),
            "PRIVMSG" => self.privmsg(id, args),
            "QUIT" => self.quit(id),
            "TOPIC" => self.topic(id, args),
            "LIST" => self.list(id, args),
            "MODE" => self.mode(id, args),
            "KICK" => self.kick(id, args),
            "OPER" => self.oper(id, args),
            "PING" => self.ping(id),
            "INFO" => self.info(id),
            "VERSION" => self.version(id),
            "MOTD" => self.motd(id),
            verb => self.state.reply(
                id,
                &Reply::ErrUnknownCommand {
                    verb: verb.to_owned(),
                },
            ),
        }
    }

    /// The pre-registration gate. NICK, USER, QUIT, and PING skip it.
    fn require_registered(&mut self, id: ConnId) -> bool {
        let registered = self
            .state
            .sessions
            .get(&id)
            .is_some_and(|session| session.registered);
        if !registered {
            self.state.reply(id, &Reply::ErrNotReg);
        }
        registered
    }

    fn nick(&mut self, id: ConnId, args: &[String]) {
        let Some(new_nick) = args.first() else {
            self.state.reply(id, &Reply::ErrNoNick);
            return;
        };

        if !state::valid_nick(new_nick) {
            self.state.reply(
                id,
                &Reply::ErrInvalidNick {
                    nick: new_nick.clone(),
                },
            );
            return;
        }

        // The server's own name and every existing key are off limits.
        let key = state::fold(new_nick);
        if key == state::fold(&self.state.name) || self.state.clients.contains_key(&key) {
            self.state.reply(
                id,
                &Reply::ErrNickInUse {
                    nick: new_nick.clone(),
                },
            );
            return;
        }

        self.state.set_nick(id, new_nick);
    }

    fn user(&mut self, id: ConnId) {
        let (has_nick, registered) = match self.state.sessions.get(&id) {
            Some(session) => (!session.nick.is_empty(), session.registered),
            None => return,
        };

        if !has_nick {
            let by = self.state.name.clone();
            self.state.reply(
                id,
                &Reply::Kill {
                    by,
                    reason: "Your nickname is already being used".to_owned(),
                },
            );
            if let Some(session) = self.state.sessions.get_mut(&id) {
                session.disconnect();
            }
            return;
        }

        if registered {
            self.state.reply(id, &Reply::ErrAlreadyReg);
            return;
        }

        if let Some(session) = self.state.sessions.get_mut(&id) {
            session.registered = true;
        }
        self.state.reply(id, &Reply::Welcome);
        self.send_motd(id);
    }

    fn join(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        let Some(list) = args.first() else {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        };

        if list == "0" {
            let joined: Vec<String> = self
                .state
                .sessions
                .get(&id)
                .map(|session| session.channels.iter().cloned().collect())
                .unwrap_or_default();
            for channel_key in joined {
                self.state.part_channel(id, &channel_key, "Leaving");
            }
            return;
        }

        let keys: Vec<&str> = args
            .get(1)
            .map(|arg| arg.split(',').collect())
            .unwrap_or_default();

        for (position, name) in list.split(',').enumerate() {
            if !state::valid_channel(name) {
                continue;
            }
            if self.may_join(id, name, keys.get(position).copied()) {
                self.state.join_channel(id, name);
            }
        }
    }

    /// Check an existing channel's key and member cap. Global operators
    /// bypass both; so do current members (the join is a no-op anyway).
    fn may_join(&mut self, id: ConnId, name: &str, key_arg: Option<&str>) -> bool {
        let folded = state::fold(name);
        let rejection = {
            let Some(channel) = self.state.channels.get(&folded) else {
                // First JOIN creates the channel; nothing to check.
                return true;
            };
            let Some(session) = self.state.sessions.get(&id) else {
                return false;
            };
            if channel.members.contains_key(&session.key) || session.operator {
                None
            } else if channel
                .mode
                .key
                .as_deref()
                .is_some_and(|required| key_arg != Some(required))
            {
                Some(Reply::ErrPassword)
            } else if channel
                .mode
                .limit
                .is_some_and(|limit| channel.members.len() >= limit)
            {
                Some(Reply::ErrNoPriv)
            } else {
                None
            }
        };

        match rejection {
            Some(reply) => {
                self.state.reply(id, &reply);
                false
            }
            None => true,
        }
    }

    fn part(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        let Some(list) = args.first() else {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        };
        let reason = if args.len() > 1 {
            args[1..].join(" ")
        } else {
            "Leaving".to_owned()
        };

        for name in list.split(',') {
            if state::valid_channel(name) {
                self.state.part_channel(id, name, &reason);
            }
        }
    }

    fn privmsg(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        if args.len() < 2 {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        }
        let target = &args[0];
        let text = args[1..].join(" ");

        let Some(sender) = self.state.sessions.get(&id) else {
            return;
        };
        let from = sender.nick.clone();
        let sender_key = sender.key.clone();

        let folded = state::fold(target);
        if let Some(channel) = self.state.channels.get(&folded) {
            if channel.mode.no_external && !channel.members.contains_key(&sender_key) {
                let reply = Reply::ErrCannotSend {
                    channel: target.clone(),
                };
                self.state.reply(id, &reply);
                return;
            }
            let line = Reply::Msg {
                from,
                target: target.clone(),
                text,
            }
            .line(&self.state.name, "");
            let members: Vec<ConnId> = channel.members.values().copied().collect();
            for member in members {
                if member != id {
                    self.state.send_raw(member, line.clone());
                }
            }
        } else if let Some(&recipient) = self.state.clients.get(&folded) {
            let to = self
                .state
                .sessions
                .get(&recipient)
                .map(|session| session.nick.clone())
                .unwrap_or_default();
            let line = Reply::Msg { from, target: to, text }.line(&self.state.name, "");
            self.state.send_raw(recipient, line);
        } else {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: target.clone(),
                },
            );
        }
    }

    fn quit(&mut self, id: ConnId) {
        if let Some(session) = self.state.sessions.get_mut(&id) {
            session.disconnect();
        }
    }

    fn topic(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        let Some(target) = args.first() else {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        };
        let folded = state::fold(target);
        let Some((display, current)) = self
            .state
            .channels
            .get(&folded)
            .map(|channel| (channel.name.clone(), channel.topic.clone()))
        else {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: target.clone(),
                },
            );
            return;
        };

        if args.len() == 1 {
            let reply = if current.is_empty() {
                Reply::NoTopic { channel: display }
            } else {
                Reply::Topic {
                    channel: display,
                    topic: current,
                }
            };
            self.state.reply(id, &reply);
            return;
        }

        if !self.may_set_topic(id, &folded) {
            self.state.reply(id, &Reply::ErrNoPriv);
            return;
        }

        let text = args[1..].join(" ");
        let members: Vec<ConnId> = match self.state.channels.get_mut(&folded) {
            Some(channel) => {
                channel.topic = text.clone();
                channel.members.values().copied().collect()
            }
            None => return,
        };

        let reply = if text.is_empty() {
            Reply::NoTopic { channel: display }
        } else {
            Reply::Topic {
                channel: display,
                topic: text,
            }
        };
        for member in members {
            self.state.reply(member, &reply);
        }
    }

    /// Topic changes on a locked channel need channel-operator (or global
    /// operator) rights.
    fn may_set_topic(&self, id: ConnId, channel_key: &str) -> bool {
        let Some(channel) = self.state.channels.get(channel_key) else {
            return false;
        };
        if !channel.mode.topic_locked {
            return true;
        }
        let Some(session) = self.state.sessions.get(&id) else {
            return false;
        };
        session.operator
            || channel
                .member_modes
                .get(&session.key)
                .copied()
                .unwrap_or_default()
                .operator
    }

    fn list(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }

        let mut items: Vec<String> = Vec::new();
        match args.first() {
            None => {
                for channel in self.state.channels.values() {
                    items.push(format!(
                        "{} {} :{}",
                        channel.name,
                        channel.members.len(),
                        channel.topic
                    ));
                }
            }
            Some(names) => {
                for name in names.split(',') {
                    if let Some(channel) = self.state.channels.get(&state::fold(name)) {
                        items.push(format!(
                            "{} {} :{}",
                            channel.name,
                            channel.members.len(),
                            channel.topic
                        ));
                    }
                }
            }
        }

        for item in items {
            self.state.reply(id, &Reply::List { item });
        }
        self.state.reply(id, &Reply::ListEnd);
    }

    fn mode(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        let Some(target) = args.first() else {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        };

        if target.starts_with('#') {
            self.channel_mode(id, target, &args[1..]);
        } else if !self.state.clients.contains_key(&state::fold(target)) {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: target.clone(),
                },
            );
        }
        // User modes are reserved; a known nick gets no reply.
    }

    fn channel_mode(&mut self, id: ConnId, target: &str, rest: &[String]) {
        let folded = state::fold(target);
        if !self.state.channels.contains_key(&folded) {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: target.to_owned(),
                },
            );
            return;
        }

        if rest.is_empty() {
            let Some(channel) = self.state.channels.get(&folded) else {
                return;
            };
            let reply = Reply::ChannelModeIs {
                channel: channel.name.clone(),
                flags: channel.mode.flag_string(),
                params: channel.mode.param_string(),
            };
            self.state.reply(id, &reply);
            return;
        }

        if !self.is_channel_operator(id, &folded) {
            self.state.reply(id, &Reply::ErrNoPriv);
            return;
        }

        for change in modes::parse_changes(&rest[0], &rest[1..]) {
            match change {
                ModeChange::Secret(on) => {
                    if let Some(channel) = self.state.channels.get_mut(&folded) {
                        channel.mode.secret = on;
                    }
                }
                ModeChange::TopicLocked(on) => {
                    if let Some(channel) = self.state.channels.get_mut(&folded) {
                        channel.mode.topic_locked = on;
                    }
                }
                ModeChange::NoExternal(on) => {
                    if let Some(channel) = self.state.channels.get_mut(&folded) {
                        channel.mode.no_external = on;
                    }
                }
                ModeChange::Key(key) => {
                    if let Some(channel) = self.state.channels.get_mut(&folded) {
                        channel.mode.key = key;
                    }
                }
                ModeChange::Limit(limit) => {
                    if let Some(channel) = self.state.channels.get_mut(&folded) {
                        channel.mode.limit = limit;
                    }
                }
                ModeChange::Operator(on, nick) => {
                    self.set_member_mode(id, &folded, &nick, |mode| mode.operator = on);
                }
                ModeChange::Voice(on, nick) => {
                    self.set_member_mode(id, &folded, &nick, |mode| mode.voice = on);
                }
            }
        }
    }

    /// Apply one per-member mode change, or tell the caller the nick is
    /// not in the channel.
    fn set_member_mode(
        &mut self,
        id: ConnId,
        channel_key: &str,
        nick: &str,
        apply: impl FnOnce(&mut super::modes::MemberMode),
    ) {
        let member_key = state::fold(nick);
        let found = self
            .state
            .channels
            .get_mut(channel_key)
            .and_then(|channel| channel.member_modes.get_mut(&member_key))
            .map(apply)
            .is_some();
        if !found {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: nick.to_owned(),
                },
            );
        }
    }

    fn is_channel_operator(&self, id: ConnId, channel_key: &str) -> bool {
        let Some(session) = self.state.sessions.get(&id) else {
            return false;
        };
        session.operator
            || self
                .state
                .channels
                .get(channel_key)
                .and_then(|channel| channel.member_modes.get(&session.key))
                .copied()
                .unwrap_or_default()
                .operator
    }

    fn kick(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        if args.len() < 2 {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        }
        let folded = state::fold(&args[0]);
        if !self.state.channels.contains_key(&folded) {
            self.state.reply(
                id,
                &Reply::ErrNoSuchNick {
                    name: args[0].clone(),
                },
            );
            return;
        }

        if !self.is_channel_operator(id, &folded) {
            self.state.reply(id, &Reply::ErrNoPriv);
            return;
        }

        let target_key = state::fold(&args[1]);
        let (by, display, target_id) = {
            let Some(channel) = self.state.channels.get(&folded) else {
                return;
            };
            let Some(&target_id) = channel.members.get(&target_key) else {
                self.state.reply(
                    id,
                    &Reply::ErrNoSuchNick {
                        name: args[1].clone(),
                    },
                );
                return;
            };
            let by = self
                .state
                .sessions
                .get(&id)
                .map(|session| session.nick.clone())
                .unwrap_or_default();
            (by, channel.name.clone(), target_id)
        };

        let target_nick = self
            .state
            .sessions
            .get(&target_id)
            .map(|session| session.nick.clone())
            .unwrap_or_else(|| args[1].clone());
        let reason = if args.len() > 2 {
            args[2..].join(" ")
        } else {
            target_nick.clone()
        };

        let line = Reply::Kick {
            by,
            channel: display,
            nick: target_nick,
            reason,
        }
        .line(&self.state.name, "");
        let members: Vec<ConnId> = self
            .state
            .channels
            .get(&folded)
            .map(|channel| channel.members.values().copied().collect())
            .unwrap_or_default();
        for member in members {
            self.state.send_raw(member, line.clone());
        }

        self.state.remove_member(&folded, &target_key);
        if let Some(session) = self.state.sessions.get_mut(&target_id) {
            session.channels.remove(&folded);
        }
    }

    fn oper(&mut self, id: ConnId, args: &[String]) {
        if !self.require_registered(id) {
            return;
        }
        if args.len() < 2 {
            self.state.reply(id, &Reply::ErrMoreArgs);
            return;
        }

        let accepted = self.config.oper_password.as_deref() == Some(args[1].as_str());
        if accepted {
            if let Some(session) = self.state.sessions.get_mut(&id) {
                session.operator = true;
            }
            self.state.reply(id, &Reply::Oper);
        } else {
            self.state.reply(id, &Reply::ErrPassword);
        }
    }

    fn ping(&mut self, id: ConnId) {
        self.state.reply(id, &Reply::Pong);
    }

    fn info(&mut self, id: ConnId) {
        if !self.require_registered(id) {
            return;
        }
        self.state.reply(
            id,
            &Reply::Info {
                text: INFO_TEXT.to_owned(),
            },
        );
    }

    fn version(&mut self, id: ConnId) {
        if !self.require_registered(id) {
            return;
        }
        self.state.reply(
            id,
            &Reply::Version {
                version: self.config.version.clone(),
            },
        );
    }

    fn motd(&mut self, id: ConnId) {
        if !self.require_registered(id) {
            return;
        }
        self.send_motd(id);
    }

    fn send_motd(&mut self, id: ConnId) {
        self.state.reply(id, &Reply::MotdStart);
        for line in &self.config.motd {
            self.state.reply(id, &Reply::Motd { line: line.clone() });
        }
        self.state.reply(id, &Reply::EndOfMotd);
    }
}
