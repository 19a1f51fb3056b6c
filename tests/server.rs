//! End-to-end tests over real TCP sockets.
//!
//! Each test binds its own server on an ephemeral port, connects one or
//! more blocking test clients, and drives the protocol through the full
//! reader / dispatcher / writer path.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use oxbow::irc::server::{serve, Config};

/// Spawn a server on an ephemeral port and return its address.
fn spawn_server() -> SocketAddr {
    let config = Config {
        name: "harbor".to_owned(),
        version: "oxbow-test".to_owned(),
        motd: vec!["welcome ashore".to_owned()],
        oper_password: Some("sesame".to_owned()),
    };

    let (addr_tx, addr_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            addr_tx.send(listener.local_addr().expect("local addr")).ok();
            serve(listener, config).await.expect("serve");
        });
    });
    addr_rx.recv().expect("server address")
}

/// Simple blocking IRC client for testing.
struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    lines: Vec<String>,
}

impl TestClient {
    fn connect(addr: SocketAddr, nick: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let writer = stream.try_clone()?;
        let reader = BufReader::new(stream);

        let mut client = Self {
            reader,
            writer,
            lines: Vec::new(),
        };

        // Register and wait for the end of the MOTD.
        client.send(&format!("NICK {nick}"))?;
        client.send(&format!("USER {nick} 0 * :{nick}"))?;
        client.read_until("376")?;

        Ok(client)
    }

    fn send(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}\r")?;
        self.writer.flush()
    }

    /// Read lines until one contains the given substring, or timeout.
    fn read_until(&mut self, marker: &str) -> io::Result<String> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    ))
                }
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']).to_owned();
                    self.lines.push(trimmed.clone());
                    if trimmed.contains(marker) {
                        return Ok(trimmed);
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("timeout waiting for {marker:?}"),
                    ));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[test]
fn registration_gets_welcome_and_motd() {
    let addr = spawn_server();
    let client = TestClient::connect(addr, "alice").expect("connect");

    assert!(client
        .lines
        .contains(&":harbor 001 alice :Welcome to harbor".to_owned()));
    assert!(client
        .lines
        .contains(&":harbor 375 alice :- Message of the day - ".to_owned()));
    assert!(client
        .lines
        .contains(&":harbor 372 alice :- welcome ashore".to_owned()));
}

#[test]
fn join_returns_topic_and_names() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect");

    alice.send("JOIN #quay").expect("send");
    alice.read_until(":alice JOIN #quay").expect("join echo");
    alice.read_until("331").expect("no-topic");
    let names = alice.read_until("353").expect("names");
    assert_eq!(names, ":harbor 353 alice = #quay :@alice");
    alice.read_until("366").expect("end of names");
}

#[test]
fn channel_messages_relay_between_clients() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect a");
    let mut bob = TestClient::connect(addr, "bob").expect("connect b");

    alice.send("JOIN #quay").expect("send");
    alice.read_until("366").expect("alice joined");
    bob.send("JOIN #quay").expect("send");
    bob.read_until("366").expect("bob joined");
    alice.read_until(":bob JOIN #quay").expect("join visible");

    alice.send("PRIVMSG #quay :ahoy there").expect("send");
    let relayed = bob.read_until("PRIVMSG").expect("relay");
    assert_eq!(relayed, ":alice PRIVMSG #quay :ahoy there");
}

#[test]
fn nick_change_is_visible_to_channel_peers() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect a");
    let mut bob = TestClient::connect(addr, "bob").expect("connect b");

    alice.send("JOIN #quay").expect("send");
    alice.read_until("366").expect("alice joined");
    bob.send("JOIN #quay").expect("send");
    bob.read_until("366").expect("bob joined");

    alice.send("NICK alba").expect("send");
    let seen = bob.read_until("NICK").expect("nick change");
    assert_eq!(seen, ":alice NICK alba");
}

#[test]
fn part_removes_the_channel_from_list() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect");

    alice.send("JOIN #solo").expect("send");
    alice.read_until("366").expect("joined");
    alice.send("PART #solo :bye").expect("send");
    let part = alice.read_until("PART").expect("part echo");
    assert_eq!(part, ":alice PART #solo bye");

    alice.send("LIST").expect("send");
    let end = alice.read_until("323").expect("list end");
    assert_eq!(end, ":harbor 323 alice");
    assert!(!alice.lines.iter().any(|l| l.contains("322")));
}

#[test]
fn kick_is_broadcast_to_kicker_and_kicked() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect a");
    let mut bob = TestClient::connect(addr, "bob").expect("connect b");

    alice.send("JOIN #quay").expect("send");
    alice.read_until("366").expect("alice joined");
    bob.send("JOIN #quay").expect("send");
    bob.read_until("366").expect("bob joined");
    alice.read_until(":bob JOIN #quay").expect("join visible");

    alice.send("KICK #quay bob :rude").expect("send");
    assert_eq!(
        alice.read_until("KICK").expect("kick echo"),
        ":alice KICK #quay bob rude"
    );
    assert_eq!(
        bob.read_until("KICK").expect("kick seen"),
        ":alice KICK #quay bob rude"
    );
}

#[test]
fn quitting_client_parts_its_channels() {
    let addr = spawn_server();
    let mut alice = TestClient::connect(addr, "alice").expect("connect a");
    let mut bob = TestClient::connect(addr, "bob").expect("connect b");

    alice.send("JOIN #quay").expect("send");
    alice.read_until("366").expect("alice joined");
    bob.send("JOIN #quay").expect("send");
    bob.read_until("366").expect("bob joined");
    alice.read_until(":bob JOIN #quay").expect("join visible");

    bob.send("QUIT :off to bed").expect("send");
    let part = alice.read_until("PART").expect("teardown part");
    assert_eq!(part, ":bob PART #quay Disconnecting");
}
