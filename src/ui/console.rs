//! Console input and message display

use std::io::{self, BufRead, Write};
use std::thread;

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver};

/// Typed-in command that ends the session
pub const QUIT_COMMAND: &str = "/quit";

/// One unit of local console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A non-empty line to send as a text message
    Line(String),
    /// The user asked to leave, or input ended
    Quit,
}

/// Renders received text messages
pub trait MessageSink: Send {
    fn display_message(&mut self, username: &str, text: &str);
}

/// Prints `[HH:MM:SS] username> text` to standard output
#[derive(Debug, Default)]
pub struct StdoutDisplay;

impl MessageSink for StdoutDisplay {
    fn display_message(&mut self, username: &str, text: &str) {
        let line = format_message(&Local::now().format("%H:%M:%S").to_string(), username, text);
        let mut stdout = io::stdout().lock();
        // a closed stdout is not worth ending the session over
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
}

fn format_message(time: &str, username: &str, text: &str) -> String {
    format!("[{}] {}> {}", time, username, text)
}

/// Read standard input on a background thread
pub fn spawn_stdin_reader() -> io::Result<Receiver<InputEvent>> {
    spawn_line_reader("stdin", io::BufReader::new(io::stdin()))
}

/// Turn lines from `reader` into input events on a background thread.
///
/// Blank lines are skipped. `/quit`, end of input or a read error yield
/// [`InputEvent::Quit`] and end the thread.
pub fn spawn_line_reader<R>(name: &str, reader: R) -> io::Result<Receiver<InputEvent>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name(format!("input-{}", name))
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Console read failed: {}", e);
                        break;
                    }
                };
                let line = line.trim_end_matches(['\r', '\n']);
                if line.trim() == QUIT_COMMAND {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(InputEvent::Line(line.to_string())).is_err() {
                    return;
                }
            }
            let _ = tx.send(InputEvent::Quit);
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn collect(input: &str) -> Vec<InputEvent> {
        let rx = spawn_line_reader("test", Cursor::new(input.to_string())).unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(2)) {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_lines_then_quit_on_eof() {
        assert_eq!(
            collect("hello\n\n  \nsecond line\n"),
            vec![
                InputEvent::Line("hello".into()),
                InputEvent::Line("second line".into()),
                InputEvent::Quit,
            ]
        );
    }

    #[test]
    fn test_quit_command_stops_reading() {
        assert_eq!(
            collect("hi\n/quit\nignored\n"),
            vec![InputEvent::Line("hi".into()), InputEvent::Quit]
        );
    }

    #[test]
    fn test_format_message() {
        assert_eq!(format_message("12:34:56", "alice", "hello"), "[12:34:56] alice> hello");
    }
}
