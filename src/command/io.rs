//! Commands that open MIDI ports and network sockets.

use crate::dsl::error::ParseError;
use crate::midi;
use crate::session::Session;

use super::{parse_number, CommandInput, CommandOutput};

pub fn midiports(_s: &mut Session, _input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let ports = midi::list_ports();
    if ports.is_empty() {
        return Ok(CommandOutput::warning(0, "no MIDI output ports"));
    }
    let listing: Vec<String> = ports
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{i}: {name}"))
        .collect();
    Ok(CommandOutput::note(0, listing.join("\n")))
}

/// `\openmidiport n` connects output port `n` (see `\midiports`).
pub fn openmidiport(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let port: usize = parse_number(input, input.arg(0), 0..=255)?;
    s.open_midi_port(port)?;
    Ok(CommandOutput::note(1, format!("MIDI port {port} open")))
}

/// `\osc name [host] port` declares a remote display client.
pub fn osc(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let (name, host, port_arg, used) = match input.args.as_slice() {
        [name, host, port, ..] if port.parse::<u16>().is_ok() => {
            (name.as_str(), host.as_str(), Some(port.as_str()), 3)
        }
        [name, port, ..] => (name.as_str(), "127.0.0.1", Some(port.as_str()), 2),
        [name] => (name.as_str(), "127.0.0.1", None, 1),
        [] => return Err(ParseError::command("\\osc needs a client name and a port")),
    };
    let port: u16 = parse_number(input, port_arg, 1..=u16::MAX)?;
    s.open_client(name, host, port)?;
    Ok(CommandOutput::note(used, format!("client {name} sends to {host}:{port}")))
}

/// `\listen port` accepts remote lines on a UDP port; 0 picks a free one.
pub fn listen(s: &mut Session, input: &CommandInput) -> Result<CommandOutput, ParseError> {
    let port: u16 = parse_number(input, input.arg(0), 0..=u16::MAX)?;
    let bound = s.listen(port)?;
    Ok(CommandOutput::note(1, format!("listening on port {bound}")))
}

#[cfg(test)]
mod tests {
    use crate::dsl::error::Severity;
    use crate::score::Symbol;
    use crate::session::{Session, SessionConfig};

    #[test]
    fn osc_declares_a_client() {
        let mut s = Session::new(SessionConfig::default());
        let r = s.parse_line("\\osc screen 127.0.0.1 9000", 0);
        assert_eq!(r.severity, Severity::Note, "{}", r.message);
        assert_eq!(s.score().resolve("screen"), Some(Symbol::Client));
        assert_eq!(s.score().clients["screen"].port, 9000);
    }

    #[test]
    fn osc_port_must_be_valid() {
        let mut s = Session::new(SessionConfig::default());
        assert_eq!(s.parse_line("\\osc screen 70000", 0).severity, Severity::Error);
        assert_eq!(s.parse_line("\\osc screen", 0).severity, Severity::Error);
        assert!(s.score().clients.is_empty());
    }

    #[test]
    fn listen_on_a_free_port() {
        let mut s = Session::new(SessionConfig::default());
        let r = s.parse_line("\\listen 0", 0);
        assert_eq!(r.severity, Severity::Note, "{}", r.message);
        assert!(r.message.starts_with("listening on port"));
    }
}
