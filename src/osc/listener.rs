//! Remote line input: a UDP socket listener on a dedicated thread.
//!
//! Accepts `/line s` (a line of notation), `/play` and `/stop`, and hands
//! them to the compiler thread over a channel.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rosc::{decoder, OscMessage, OscPacket, OscType};

/// Input received from a remote controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteInput {
    Line(String),
    Play,
    Stop,
}

/// Translate one message; unknown addresses are ignored.
pub fn decode_input(msg: &OscMessage) -> Option<RemoteInput> {
    match msg.addr.as_str() {
        "/line" => match msg.args.first() {
            Some(OscType::String(s)) => Some(RemoteInput::Line(s.clone())),
            _ => None,
        },
        "/play" => Some(RemoteInput::Play),
        "/stop" => Some(RemoteInput::Stop),
        _ => None,
    }
}

/// Active listener running on a background thread.
pub struct OscListener {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    port: u16,
}

impl OscListener {
    /// Start listening on `port`; port 0 picks a free one.
    pub fn start(port: u16, sender: Sender<RemoteInput>) -> io::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", port))?;
        let port = socket.local_addr()?.port();
        // bounded wait so `stop` is noticed
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let halt = Arc::clone(&stop_flag);
        let thread = thread::Builder::new()
            .name(format!("osc-listen-{port}"))
            .spawn(move || serve(&socket, &halt, &sender))?;

        tracing::info!(port, "listening for remote input");
        Ok(Self {
            stop_flag,
            thread: Some(thread),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signal the listener to stop and wait for it.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OscListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receive until halted or the session hangs up.
fn serve(socket: &UdpSocket, halt: &AtomicBool, sender: &Sender<RemoteInput>) {
    let mut buf = [0u8; 4096];
    while !halt.load(Ordering::Relaxed) {
        let size = match socket.recv_from(&mut buf) {
            Ok((size, _)) => size,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "remote input socket failed");
                return;
            }
        };
        let packet = match decoder::decode_udp(&buf[..size]) {
            Ok((_, packet)) => packet,
            Err(e) => {
                tracing::debug!(error = ?e, size, "dropping undecodable packet");
                continue;
            }
        };
        for input in flatten(packet).iter().filter_map(decode_input) {
            if sender.send(input).is_err() {
                return;
            }
        }
    }
}

fn flatten(packet: OscPacket) -> Vec<OscMessage> {
    match packet {
        OscPacket::Message(msg) => vec![msg],
        OscPacket::Bundle(bundle) => bundle.content.into_iter().flat_map(flatten).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosc::encoder;
    use std::sync::mpsc;

    #[test]
    fn decodes_known_addresses() {
        let line = OscMessage {
            addr: "/line".into(),
            args: vec![OscType::String("\\play".into())],
        };
        assert_eq!(decode_input(&line), Some(RemoteInput::Line("\\play".into())));
        let bad = OscMessage {
            addr: "/line".into(),
            args: vec![OscType::Int(1)],
        };
        assert_eq!(decode_input(&bad), None);
        let other = OscMessage {
            addr: "/volume".into(),
            args: Vec::new(),
        };
        assert_eq!(decode_input(&other), None);
    }

    #[test]
    fn start_and_stop() {
        let (tx, _rx) = mpsc::channel();
        let mut listener = OscListener::start(0, tx).unwrap();
        assert!(listener.port() > 0);
        listener.stop();
    }

    #[test]
    fn send_and_receive_osc() {
        let (tx, rx) = mpsc::channel();
        let mut listener = OscListener::start(0, tx).unwrap();

        let msg = OscPacket::Message(OscMessage {
            addr: "/stop".to_string(),
            args: vec![],
        });
        let encoded = encoder::encode(&msg).unwrap();
        let sender_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender_socket
            .send_to(&encoded, ("127.0.0.1", listener.port()))
            .unwrap();

        let input = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(input, RemoteInput::Stop);
        listener.stop();
    }

    #[test]
    fn bind_failure_on_used_port() {
        let (tx1, _rx1) = mpsc::channel();
        let listener = OscListener::start(0, tx1).unwrap();
        let (tx2, _rx2) = mpsc::channel();
        assert!(OscListener::start(listener.port(), tx2).is_err());
    }
}
