//! Remote display client: a sink that sends OSC datagrams over UDP.

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use rosc::{encoder, OscMessage, OscPacket};

use super::message;
use crate::score::event::{Articulation, TextMark};
use crate::sink::{Notification, Sink, SinkError, SinkTarget};

/// Sends every message after an optional delay, drained on `flush`.
pub struct RemoteClient {
    name: String,
    socket: UdpSocket,
    addr: SocketAddr,
    delay: Duration,
    now: Duration,
    queue: VecDeque<(Duration, OscMessage)>,
}

impl RemoteClient {
    pub fn connect(name: &str, host: &str, port: u16, delay_ms: u32) -> Result<Self, SinkError> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SinkError::Osc(format!("cannot resolve {host}:{port}")))?;
        let socket = UdpSocket::bind(if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" })?;
        tracing::info!(client = name, %addr, "remote client ready");
        Ok(Self {
            name: name.to_string(),
            socket,
            addr,
            delay: Duration::from_millis(delay_ms as u64),
            now: Duration::ZERO,
            queue: VecDeque::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn send(&mut self, msg: OscMessage) -> Result<(), SinkError> {
        if self.delay.is_zero() {
            return self.send_now(msg);
        }
        self.queue.push_back((self.now + self.delay, msg));
        Ok(())
    }

    fn send_now(&self, msg: OscMessage) -> Result<(), SinkError> {
        let bytes = encoder::encode(&OscPacket::Message(msg))
            .map_err(|e| SinkError::Osc(format!("encode: {e:?}")))?;
        self.socket.send_to(&bytes, self.addr)?;
        Ok(())
    }
}

impl Sink for RemoteClient {
    fn note_on(&mut self, target: SinkTarget, pitches: &[f32], velocity: u8) -> Result<(), SinkError> {
        self.send(message::note_message(target.instrument, pitches, velocity))
    }

    fn rest(&mut self, target: SinkTarget) -> Result<(), SinkError> {
        self.send(message::rest_message(target.instrument))
    }

    fn set_dynamic(&mut self, target: SinkTarget, level: f32) -> Result<(), SinkError> {
        self.send(message::dynamic_message(target.instrument, level))
    }

    fn set_articulation(&mut self, target: SinkTarget, articulations: &[Articulation]) -> Result<(), SinkError> {
        let codes: Vec<u8> = articulations.iter().map(|a| a.code()).collect();
        self.send(message::articulation_message(target.instrument, &codes))
    }

    fn set_text(&mut self, target: SinkTarget, text: &TextMark) -> Result<(), SinkError> {
        self.send(message::text_message(target.instrument, &text.text))
    }

    fn notify(&mut self, notification: &Notification) -> Result<(), SinkError> {
        self.send(message::notification_message(notification))
    }

    fn send_raw(&mut self, addr: &str, args: &[String]) -> Result<(), SinkError> {
        self.send(message::raw_message(addr, args))
    }

    fn set_delay(&mut self, delay_ms: u32) {
        self.delay = Duration::from_millis(delay_ms as u64);
    }

    fn flush(&mut self, now: Duration) -> Result<(), SinkError> {
        self.now = now;
        while self.queue.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, msg)) = self.queue.pop_front() {
                self.send_now(msg)?;
            }
        }
        Ok(())
    }
}
