//! Score building through the public session API: bars, loops, linkage,
//! accidentals, functions and configuration files.

use scorelive::dsl::note::Accidental;
use scorelive::score::event::BarEvents;
use scorelive::session::{Session, SessionConfig};
use scorelive::Severity;
use std::sync::Arc;

fn session() -> Session {
    Session::new(SessionConfig::default())
}

fn ok(s: &mut Session, line: &str) -> String {
    let r = s.parse_line(line, 0);
    assert!(r.severity < Severity::Error, "{line}: {}", r.message);
    r.message
}

fn err(s: &mut Session, line: &str) -> String {
    let r = s.parse_line(line, 0);
    assert_eq!(r.severity, Severity::Error, "{line} should fail");
    r.message
}

fn events(s: &Session, inst: &str, bar: &str) -> Arc<BarEvents> {
    let id = s.score().instrument_id(inst).expect("no such instrument");
    let index = s.score().graph.lookup(bar).expect("no such bar");
    s.score()
        .instrument(id)
        .and_then(|i| i.events(index))
        .cloned()
        .expect("no events")
}

#[test]
fn tuplets_take_their_nominal_time() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\bar t { \\vln \\tuplet 3/2 { c'8 d'8 e'8 } f'4 g'2 }");
    let bar = events(&s, "vln", "t");
    let triplet: u32 = bar.steps[..3].iter().map(|e| e.duration).sum();
    assert_eq!(triplet, 64);
    assert_eq!(bar.steps[3].onset, 64);
    assert_eq!(bar.ticks, 256);
}

#[test]
fn loops_must_keep_linked_bars_together() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\bar a { \\vln c'1~ }");
    ok(&mut s, "\\bar b { \\vln c'1 }");
    ok(&mut s, "\\bar c { \\vln e'1 }");

    ok(&mut s, "\\loop good { a b c }");
    let msg = err(&mut s, "\\loop bad { a c b }");
    assert!(msg.contains("linked"), "{msg}");
    err(&mut s, "\\loop alone { a }");
    assert!(s.score().graph.lookup("bad").is_none());

    let good = s.score().graph.lookup("good").unwrap();
    assert_eq!(s.cue(), good);
    assert_eq!(s.score().graph.sequence(good).unwrap().len(), 3);
}

#[test]
fn natural_signs_respect_the_octave_setting() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\bar same { \\vln cis'2 c''2 }");
    assert_eq!(events(&s, "vln", "same").steps[1].pitches[0].shown, Accidental::None);

    ok(&mut s, "\\score.correctoctave off");
    ok(&mut s, "\\bar any { \\vln cis'2 c''2 }");
    assert_eq!(events(&s, "vln", "any").steps[1].pitches[0].shown, Accidental::Natural);
}

#[test]
fn compiled_bars_read_back_as_source() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\bar first { \\vln c'4-.\\f d'8( e'8) <f' a'>4 r4 }");
    let first = events(&s, "vln", "first");
    let source = first.to_source();
    ok(&mut s, &format!("\\bar second {{ \\vln {source} }}"));
    assert_eq!(events(&s, "vln", "second").steps, first.steps);
}

#[test]
fn a_failed_line_discards_the_whole_bar() {
    let mut s = session();
    ok(&mut s, "\\insts vln vla");
    ok(&mut s, "\\bar kept { \\vln c'1 }");
    let cue = s.cue();

    ok(&mut s, "\\bar broken {");
    ok(&mut s, "\\vln c'2 d'2");
    err(&mut s, "\\vla c'2 d'4");
    assert_eq!(s.parse_line("\\vla c'1", 0).severity, Severity::Note);
    assert_eq!(s.parse_line("}", 0).severity, Severity::Warning);

    assert!(s.score().graph.lookup("broken").is_none());
    assert_eq!(s.cue(), cue);
    ok(&mut s, "\\bar broken { \\vla c'1 }");
}

#[test]
fn functions_build_bars_from_arguments() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\function phrase {");
    ok(&mut s, "\\print building $1");
    ok(&mut s, "\\bar $1 { \\vln $2 $2 }");
    ok(&mut s, "}");
    assert!(s.score().functions.contains_key("phrase"));

    ok(&mut s, "\\phrase { hook g'2 }");
    let bar = events(&s, "vln", "hook");
    let pitches: Vec<f32> = bar.steps.iter().flat_map(|e| e.midi.clone()).collect();
    assert_eq!(pitches, vec![67.0, 67.0]);

    let msg = err(&mut s, "\\phrase { lonely }");
    assert!(msg.contains("arguments"), "{msg}");
}

#[test]
fn lists_feed_melodic_lines() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    ok(&mut s, "\\list motifs { c'2 e'2 g'2 }");
    ok(&mut s, "\\bar m { \\vln \\motifs 3 \\motifs 1 }");
    let pitches: Vec<f32> = events(&s, "vln", "m")
        .steps
        .iter()
        .flat_map(|e| e.midi.clone())
        .collect();
    assert_eq!(pitches, vec![67.0, 60.0]);
}

#[test]
fn config_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");
    let config = SessionConfig {
        default_tempo: 90.0,
        countdown: 4,
        listen_port: Some(9001),
        ..SessionConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = SessionConfig::load_from(&path).unwrap();
    assert_eq!(loaded.default_tempo, 90.0);
    assert_eq!(loaded.countdown, 4);
    assert_eq!(loaded.listen_port, Some(9001));
    assert!(SessionConfig::load_from(&dir.path().join("missing.yaml")).is_err());
}

#[test]
fn deleting_an_instrument_frees_its_name() {
    let mut s = session();
    ok(&mut s, "\\insts vln");
    err(&mut s, "\\insts vln");
    ok(&mut s, "\\delete vln");
    assert!(s.score().instrument_id("vln").is_none());
    ok(&mut s, "\\insts vln");
}
