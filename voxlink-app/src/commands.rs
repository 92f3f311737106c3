//! Console command parsing.
//!
//! One command per stdin line. A line that is not a known command is sent to
//! the server verbatim as a text message.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Capture locally, upload the WAV when stopped.
    Record,
    /// Capture and stream over a chunked HTTP upload.
    Stream,
    /// Capture and send frames as binary messages on the socket.
    Relay,
    Stop,
    Play(PathBuf),
    /// Stop playback and discard buffered audio.
    Hush,
    Stats,
    Help,
    Quit,
    Text(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ConsoleCommand::Empty;
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (trimmed, ""),
        };
        match (word.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("record", true) => ConsoleCommand::Record,
            ("stream", true) => ConsoleCommand::Stream,
            ("relay", true) => ConsoleCommand::Relay,
            ("stop", true) => ConsoleCommand::Stop,
            ("play", false) => ConsoleCommand::Play(PathBuf::from(rest)),
            ("hush", true) => ConsoleCommand::Hush,
            ("stats", true) => ConsoleCommand::Stats,
            ("help", true) | ("?", true) => ConsoleCommand::Help,
            ("quit", true) | ("exit", true) => ConsoleCommand::Quit,
            _ => ConsoleCommand::Text(line.to_string()),
        }
    }
}

pub const HELP: &str = "\
commands:
  record        capture, upload the recording on stop
  stream        capture with a live chunked upload
  relay         capture, send frames over the socket
  stop          stop the current capture
  play <file>   play a local WAV file
  hush          stop playback
  stats         print pipeline counters
  quit          disconnect and exit
anything else is sent as a text message";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(ConsoleCommand::parse("RECORD\n"), ConsoleCommand::Record);
        assert_eq!(ConsoleCommand::parse("  stop "), ConsoleCommand::Stop);
        assert_eq!(ConsoleCommand::parse("exit"), ConsoleCommand::Quit);
    }

    #[test]
    fn play_takes_the_rest_of_the_line_as_path() {
        assert_eq!(
            ConsoleCommand::parse("play clips/hello world.wav"),
            ConsoleCommand::Play(PathBuf::from("clips/hello world.wav"))
        );
        // Without an argument it is just text.
        assert_eq!(
            ConsoleCommand::parse("play"),
            ConsoleCommand::Text("play".into())
        );
    }

    #[test]
    fn other_lines_are_text_verbatim() {
        assert_eq!(
            ConsoleCommand::parse("  stop the music\r\n"),
            ConsoleCommand::Text("  stop the music".into())
        );
        assert_eq!(ConsoleCommand::parse("   "), ConsoleCommand::Empty);
    }
}
