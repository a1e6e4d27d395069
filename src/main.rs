//! scorelive: read a score file, then keep reading lines from stdin while
//! the scheduler plays.

use clap::Parser;
use scorelive::midi;
use scorelive::session::{LineResult, Session, SessionConfig};
use scorelive::Severity;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often scheduler events are drained while waiting for input.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Live-coded score player
#[derive(Parser)]
#[command(name = "scorelive")]
#[command(about = "Play bars and loops of notation while editing them")]
#[command(version)]
struct Cli {
    /// Score file read before interactive input starts
    score: Option<PathBuf>,

    /// Start playing the cued bar or loop once the score is loaded
    #[arg(long)]
    play: bool,

    /// Configuration file (default: ~/.scorelive/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Accept remote lines on this UDP port
    #[arg(long)]
    listen: Option<u16>,

    /// MIDI output port to open at startup
    #[arg(long)]
    midi_port: Option<usize>,

    /// List MIDI output ports and exit
    #[arg(long)]
    list_midi_ports: bool,

    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

enum Input {
    Line(String),
    Eof,
    Interrupt,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(result: &LineResult, line: Option<usize>) {
    if result.severity == Severity::None || result.message.is_empty() {
        return;
    }
    let prefix = match line {
        Some(n) => format!("line {}: ", n + 1),
        None => String::new(),
    };
    match result.severity {
        Severity::Note => println!("{prefix}{}", result.message),
        severity => eprintln!("{prefix}{severity}: {}", result.message),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_midi_ports {
        let ports = midi::list_ports();
        if ports.is_empty() {
            println!("no MIDI output ports");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{i}: {name}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from(path)?,
        None => SessionConfig::load(),
    };
    if cli.midi_port.is_some() {
        config.midi_port = cli.midi_port;
    }
    if cli.listen.is_some() {
        config.listen_port = cli.listen;
    }

    let mut session = Session::new(config);
    for problem in session.open_configured_outputs() {
        tracing::warn!("{problem}");
        eprintln!("warning: {problem}");
    }

    let mut line_index = 0;
    if let Some(path) = &cli.score {
        let text = std::fs::read_to_string(path)?;
        for line in text.lines() {
            let result = session.parse_line(line, line_index);
            report(&result, Some(line_index));
            line_index += 1;
        }
        tracing::info!(path = %path.display(), lines = line_index, "score loaded");
    }
    if cli.play {
        report(&session.parse_line("\\play", line_index), None);
    }

    let (tx, rx) = mpsc::channel();
    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Input::Interrupt);
    })?;
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(Input::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(Input::Eof);
    });

    let mut input_open = true;
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Input::Line(line)) => {
                let result = session.parse_line(&line, line_index);
                report(&result, Some(line_index));
                line_index += 1;
            }
            Ok(Input::Eof) => input_open = false,
            Ok(Input::Interrupt) => {
                if !session.is_playing() {
                    break;
                }
                session.stop_now();
                eprintln!("stopped");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        for result in session.poll() {
            report(&result, None);
        }
        if !input_open && !session.is_playing() {
            break;
        }
    }

    session.stop_now();
    Ok(())
}
