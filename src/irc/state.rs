//! The in-memory directories and their state transitions.
//!
//! `ServerState` is owned exclusively by the dispatcher task; nothing here
//! is locked. Sessions and channels never hold pointers to each other:
//! every cross-reference is a directory key (a connection id or an
//! ASCII-lower-cased name), so removing an entity is removing its keys.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::modes::{ChannelMode, MemberMode};
use super::replies::Reply;

/// Identifies one connection for the lifetime of the process.
pub type ConnId = u64;

/// Nicks per 353 reply; longer channels get several before the 366.
const NAMES_CHUNK: usize = 128;

/// Lower-cased lookup key for a nick or channel name. Display forms keep
/// their original case.
pub fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Nick grammar: a letter or `[]_^{|}` special, then letters, digits, and
/// specials.
pub fn valid_nick(nick: &str) -> bool {
    let special = |c: char| matches!(c, '[' | ']' | '_' | '^' | '{' | '|' | '}');
    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || special(first))
        && chars.all(|c| c.is_ascii_alphanumeric() || special(c))
}

/// Channel grammar: `#`, then letters, digits, `_`, and `-`. Case is
/// ignored here and folded away in the directory key.
pub fn valid_channel(name: &str) -> bool {
    match name.strip_prefix('#') {
        Some(rest) => {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    }
}

/// The dispatcher's cross-thread handle to one connection: the bounded
/// output queue and the stop-signal queue, both non-blocking on this side.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub lines: mpsc::Sender<String>,
    pub stop: mpsc::Sender<()>,
}

/// Dispatcher-side record of one connected client.
#[derive(Debug)]
pub struct Session {
    /// Display nick; empty until the first accepted NICK.
    pub nick: String,
    /// Folded nick, the `clients` directory key; empty alongside `nick`.
    pub key: String,
    /// True once both NICK and USER have been accepted.
    pub registered: bool,
    /// Cleared on teardown to suppress further writes.
    pub connected: bool,
    /// Global operator flag (OPER).
    pub operator: bool,
    /// Folded names of the channels this session has joined.
    pub channels: HashSet<String>,
    handle: SessionHandle,
}

impl Session {
    pub fn new(handle: SessionHandle) -> Self {
        Session {
            nick: String::new(),
            key: String::new(),
            registered: false,
            connected: true,
            operator: false,
            channels: HashSet::new(),
            handle,
        }
    }

    /// Enqueue one line without blocking. A full queue means the client is
    /// not draining its socket: mark it dead and fire its stop signal.
    pub fn send(&mut self, line: String) {
        if !self.connected {
            return;
        }
        match self.handle.lines.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(nick = %self.nick, "output queue full, dropping client");
                self.connected = false;
                let _ = self.handle.stop.try_send(());
            }
            Err(TrySendError::Closed(_)) => {
                self.connected = false;
            }
        }
    }

    /// Mark the session dead and fire its stop signal. Idempotent; the
    /// harness posts a single `Disconnected` event when it winds down.
    pub fn disconnect(&mut self) {
        self.connected = false;
        let _ = self.handle.stop.try_send(());
    }
}

/// One named multicast group.
#[derive(Debug)]
pub struct Channel {
    /// Display name, as first joined.
    pub name: String,
    pub topic: String,
    /// Folded member nick to connection id.
    pub members: HashMap<String, ConnId>,
    /// Folded member nick to per-member flags; same key set as `members`.
    pub member_modes: HashMap<String, MemberMode>,
    pub mode: ChannelMode,
}

impl Channel {
    fn new(name: &str) -> Self {
        Channel {
            name: name.to_owned(),
            topic: String::new(),
            members: HashMap::new(),
            member_modes: HashMap::new(),
            mode: ChannelMode {
                secret: true,
                topic_locked: true,
                no_external: true,
                ..ChannelMode::default()
            },
        }
    }
}

/// All shared server state. Mutated only on the dispatcher task.
#[derive(Debug)]
pub struct ServerState {
    /// Advertised server name; also the source prefix of numeric replies.
    pub name: String,
    /// Every live connection, registered or not.
    pub sessions: HashMap<ConnId, Session>,
    /// Folded nick to connection id.
    pub clients: HashMap<String, ConnId>,
    /// Folded channel name to channel.
    pub channels: HashMap<String, Channel>,
}

impl ServerState {
    pub fn new(name: String) -> Self {
        ServerState {
            name,
            sessions: HashMap::new(),
            clients: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    /// Format `reply` for the session's own context and enqueue it.
    pub fn reply(&mut self, id: ConnId, reply: &Reply) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let line = reply.line(&self.name, &session.nick);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.send(line);
        }
    }

    /// Enqueue an already-formatted line.
    pub fn send_raw(&mut self, id: ConnId, line: String) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.send(line);
        }
    }

    /// Assign or change a session's nick. The caller has already validated
    /// the nick and checked for collisions.
    ///
    /// The rename is atomic from every observer's point of view: the
    /// directory and every channel the session is in are re-keyed within
    /// one call, and each session that shares a channel (the renaming one
    /// included) sees exactly one NICK notification. The session's own new
    /// entry is re-inserted into a channel only after that channel's
    /// members have been collected, so the de-dup set never double-counts
    /// the renamer.
    pub fn set_nick(&mut self, id: ConnId, new_nick: &str) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let old_nick = session.nick.clone();
        let old_key = session.key.clone();
        let channel_keys: Vec<String> = session.channels.iter().cloned().collect();
        let new_key = fold(new_nick);

        if !old_key.is_empty() {
            self.clients.remove(&old_key);
        }
        self.clients.insert(new_key.clone(), id);

        if old_nick.is_empty() {
            // First nick: nothing to re-key, nobody to notify.
            if let Some(session) = self.sessions.get_mut(&id) {
                session.nick = new_nick.to_owned();
                session.key = new_key;
            }
            return;
        }

        let line = Reply::NickChange {
            old: old_nick,
            new: new_nick.to_owned(),
        }
        .line(&self.name, "");

        self.send_raw(id, line.clone());
        let mut visited: HashSet<ConnId> = HashSet::new();
        visited.insert(id);

        for channel_key in &channel_keys {
            let Some(channel) = self.channels.get_mut(channel_key) else {
                continue;
            };
            channel.members.remove(&old_key);
            let mode = channel.member_modes.remove(&old_key).unwrap_or_default();
            let others: Vec<ConnId> = channel.members.values().copied().collect();
            channel.members.insert(new_key.clone(), id);
            channel.member_modes.insert(new_key.clone(), mode);

            for member in others {
                if visited.insert(member) {
                    self.send_raw(member, line.clone());
                }
            }
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.nick = new_nick.to_owned();
            session.key = new_key;
        }
    }

    /// Add the session to a channel, creating the channel if needed (the
    /// creator becomes channel operator). Broadcasts the JOIN to every
    /// member including the joiner, then sends the topic and the names
    /// list to the joiner. A no-op if the session is already a member.
    pub fn join_channel(&mut self, id: ConnId, channel_name: &str) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let nick = session.nick.clone();
        let session_key = session.key.clone();
        let key = fold(channel_name);

        let created = !self.channels.contains_key(&key);
        let channel = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| Channel::new(channel_name));

        if channel.members.contains_key(&session_key) {
            return;
        }

        channel.members.insert(session_key.clone(), id);
        channel.member_modes.insert(
            session_key,
            MemberMode {
                operator: created,
                voice: false,
            },
        );

        let display = channel.name.clone();
        let topic = channel.topic.clone();
        let roster: Vec<(ConnId, &'static str)> = channel
            .members
            .iter()
            .map(|(member_key, &member)| {
                let prefix = channel
                    .member_modes
                    .get(member_key)
                    .copied()
                    .unwrap_or_default()
                    .prefix();
                (member, prefix)
            })
            .collect();

        if let Some(session) = self.sessions.get_mut(&id) {
            session.channels.insert(key);
        }

        let join_line = Reply::Join {
            nick,
            channel: display.clone(),
        }
        .line(&self.name, "");
        for &(member, _) in &roster {
            self.send_raw(member, join_line.clone());
        }

        if topic.is_empty() {
            self.reply(id, &Reply::NoTopic { channel: display.clone() });
        } else {
            self.reply(
                id,
                &Reply::Topic {
                    channel: display.clone(),
                    topic,
                },
            );
        }

        let mut nicks: Vec<String> = Vec::with_capacity(NAMES_CHUNK);
        for &(member, prefix) in &roster {
            let Some(member_session) = self.sessions.get(&member) else {
                continue;
            };
            let entry = format!("{prefix}{}", member_session.nick);
            if nicks.len() >= NAMES_CHUNK {
                let chunk = nicks.join(" ");
                nicks.clear();
                self.reply(
                    id,
                    &Reply::Names {
                        channel: display.clone(),
                        nicks: chunk,
                    },
                );
            }
            nicks.push(entry);
        }
        if !nicks.is_empty() {
            self.reply(
                id,
                &Reply::Names {
                    channel: display.clone(),
                    nicks: nicks.join(" "),
                },
            );
        }
        self.reply(id, &Reply::EndOfNames { channel: display });
    }

    /// Remove the session from a channel, broadcasting the PART (with
    /// `reason`) to every member including the departing one. Empty
    /// channels are dropped from the directory. A no-op if the session is
    /// not a member or the channel does not exist.
    pub fn part_channel(&mut self, id: ConnId, channel_name: &str, reason: &str) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let nick = session.nick.clone();
        let session_key = session.key.clone();
        let key = fold(channel_name);

        let Some(channel) = self.channels.get(&key) else {
            return;
        };
        if !channel.members.contains_key(&session_key) {
            return;
        }

        let line = Reply::Part {
            nick,
            channel: channel.name.clone(),
            reason: reason.to_owned(),
        }
        .line(&self.name, "");
        let members: Vec<ConnId> = channel.members.values().copied().collect();
        for member in members {
            self.send_raw(member, line.clone());
        }

        self.remove_member(&key, &session_key);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.channels.remove(&key);
        }
    }

    /// Drop one membership entry and GC the channel if it empties. Does
    /// not touch the member's own channel set; callers do.
    pub fn remove_member(&mut self, channel_key: &str, member_key: &str) {
        let emptied = match self.channels.get_mut(channel_key) {
            Some(channel) => {
                channel.members.remove(member_key);
                channel.member_modes.remove(member_key);
                channel.members.is_empty()
            }
            None => return,
        };
        if emptied {
            self.channels.remove(channel_key);
        }
    }

    /// Tear a session down: part every joined channel (broadcasting the
    /// PARTs), then drop it from the directories. Runs on the dispatcher
    /// when the connection harness reports `Disconnected`.
    pub fn remove_session(&mut self, id: ConnId) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        let key = session.key.clone();
        let channel_keys: Vec<String> = session.channels.iter().cloned().collect();

        for channel_key in channel_keys {
            self.part_channel(id, &channel_key, "Disconnecting");
        }

        if !key.is_empty() && self.clients.get(&key) == Some(&id) {
            self.clients.remove(&key);
        }
        self.sessions.remove(&id);
        debug!(id, "session removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_lower_cases_ascii() {
        assert_eq!(fold("WrEn"), "wren");
        assert_eq!(fold("#Reeds"), "#reeds");
    }

    #[test]
    fn nick_grammar() {
        assert!(valid_nick("wren"));
        assert!(valid_nick("[wren]"));
        assert!(valid_nick("w3n_{|}^"));
        assert!(!valid_nick(""));
        assert!(!valid_nick("3wren"));
        assert!(!valid_nick("wr en"));
        assert!(!valid_nick("wren!"));
    }

    #[test]
    fn channel_grammar() {
        assert!(valid_channel("#reeds"));
        assert!(valid_channel("#Reeds"));
        assert!(valid_channel("#r-2_x"));
        assert!(!valid_channel("reeds"));
        assert!(!valid_channel("#"));
        assert!(!valid_channel("#re eds"));
        assert!(!valid_channel("#re,eds"));
    }
}
