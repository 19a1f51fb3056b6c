//! oxbow is a small multi-user chat relay server speaking a subset of the
//! classic IRC line protocol. Clients register a nickname, join `#`-prefixed
//! channels, and exchange messages with channels or with each other; the
//! server relays every line to the participants who should see it.
//!
//! All shared state lives on a single dispatcher task fed by one global
//! event queue; per-connection reader and writer tasks talk to it only
//! through channels. See `irc::server` for the engine.

pub mod irc;
