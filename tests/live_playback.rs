//! Live playback integration tests: lines typed into a session are heard
//! through an attached sink while the scheduler thread runs.
//!
//! No MIDI hardware is needed; a RecordingSink stands in for the outputs.

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use scorelive::session::{Session, SessionConfig};
use scorelive::sink::{RecordingSink, SinkCall, SinkKey};
use scorelive::Severity;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

fn session_with_recorder() -> (Session, RecordingSink) {
    let mut session = Session::new(SessionConfig::default());
    let recorder = RecordingSink::new();
    session
        .attach_sink(SinkKey::Custom("rec".into()), Box::new(recorder.clone()))
        .expect("attach failed");
    (session, recorder)
}

fn run(session: &mut Session, line: &str) {
    let result = session.parse_line(line, 0);
    assert!(
        result.severity < Severity::Error,
        "{line}: {}",
        result.message
    );
}

/// Poll the session until `done` holds or `timeout` passes.
fn wait_for(session: &mut Session, timeout: Duration, mut done: impl FnMut(&mut Session) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        session.poll();
        if done(session) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn a_bar_is_heard_after_play() {
    let (mut session, recorder) = session_with_recorder();
    run(&mut session, "\\insts inst1");
    run(&mut session, "\\bar 1 { \\inst1 c'4 d'4 e'4 f'4 }");
    run(&mut session, "\\play");
    assert!(session.is_playing());

    let heard = wait_for(&mut session, Duration::from_millis(1500), |_| {
        !recorder.note_ons().is_empty()
    });
    assert!(heard, "no note within 1.5 s");
    let id = session.score().instrument_id("inst1").unwrap();
    let (instrument, pitches) = recorder.note_ons()[0].clone();
    assert_eq!(instrument, id);
    assert_eq!(pitches, vec![60.0]);

    session.stop_now();
}

#[test]
fn stop_now_leaves_nothing_sounding() {
    let (mut session, recorder) = session_with_recorder();
    run(&mut session, "\\insts inst1");
    run(&mut session, "\\bar held { \\inst1 c'1 }");
    run(&mut session, "\\play held");
    assert!(wait_for(&mut session, Duration::from_millis(1500), |_| {
        !recorder.note_ons().is_empty()
    }));

    run(&mut session, "\\stopnow");
    assert!(!session.is_playing());
    assert_eq!(session.status().state.name(), "idle");
    let calls = recorder.calls();
    assert!(calls.iter().any(|c| matches!(c, SinkCall::Silence(_))));

    recorder.clear();
    thread::sleep(Duration::from_millis(100));
    assert!(recorder.note_ons().is_empty());
}

#[test]
fn cueing_a_new_bar_cuts_a_held_tie() {
    let (mut session, recorder) = session_with_recorder();
    run(&mut session, "\\insts inst1");
    run(&mut session, "\\bar held { \\inst1 c'1~ }");
    run(&mut session, "\\bar after { \\inst1 c'1 }");
    run(&mut session, "\\bar other { \\inst1 e'1 }");
    run(&mut session, "\\play held");
    assert!(wait_for(&mut session, Duration::from_millis(1500), |_| {
        !recorder.note_ons().is_empty()
    }));

    run(&mut session, "\\play other");
    let switched = wait_for(&mut session, Duration::from_secs(3), |_| {
        recorder.note_ons().iter().any(|(_, p)| p == &vec![64.0])
    });
    session.stop_now();
    assert!(switched, "cued bar never started");

    let calls = recorder.calls();
    let released = calls.iter().position(|c| {
        matches!(c, SinkCall::NoteOff { pitches, .. } if pitches == &vec![60.0])
    });
    let struck = calls.iter().position(|c| {
        matches!(c, SinkCall::NoteOn { pitches, .. } if pitches == &vec![64.0])
    });
    assert!(released.is_some(), "tied note was never released");
    assert!(released < struck);
}

#[test]
fn a_beat_bound_function_runs_between_lines() {
    let (mut session, _recorder) = session_with_recorder();
    run(&mut session, "\\insts inst1");
    run(&mut session, "\\bar 1 { \\inst1 c'4 d'4 e'4 f'4 }");
    run(&mut session, "\\function tick { \\print tock }");
    run(&mut session, "\\tick.bind beat");
    run(&mut session, "\\play");

    let mut printed = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && !printed {
        printed = session.poll().iter().any(|r| r.message == "tock");
        thread::sleep(Duration::from_millis(5));
    }
    session.stop_now();
    assert!(printed, "bound function never ran");
}

#[test]
fn remote_lines_are_parsed_on_poll() {
    let mut session = Session::new(SessionConfig::default());
    let result = session.parse_line("\\listen 0", 0);
    let port: u16 = result
        .message
        .rsplit(' ')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("no port in listen reply");

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let packet = OscPacket::Message(OscMessage {
        addr: "/line".into(),
        args: vec![OscType::String("\\insts remote1".into())],
    });
    let bytes = encoder::encode(&packet).unwrap();
    socket.send_to(&bytes, ("127.0.0.1", port)).unwrap();

    let arrived = wait_for(&mut session, Duration::from_secs(2), |s| {
        s.score().instrument_id("remote1").is_some()
    });
    assert!(arrived, "remote line was not applied");
}

#[test]
fn client_receives_raw_messages() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let mut session = Session::new(SessionConfig::default());
    run(&mut session, &format!("\\osc screen 127.0.0.1 {port}"));
    run(&mut session, "\\screen /hello 1 2.5 there");

    let mut buf = [0u8; 1024];
    let (size, _) = receiver.recv_from(&mut buf).unwrap();
    let message = match decoder::decode_udp(&buf[..size]).unwrap().1 {
        OscPacket::Message(m) => m,
        OscPacket::Bundle(_) => panic!("unexpected bundle"),
    };
    assert_eq!(message.addr, "/hello");
    assert_eq!(
        message.args,
        vec![
            OscType::Int(1),
            OscType::Float(2.5),
            OscType::String("there".into())
        ]
    );
}
