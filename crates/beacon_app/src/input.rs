use beacon_core::Query;
use beacon_engine::{MonitorCommand, MonitorHandle};

/// A line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Command(MonitorCommand),
    Quit,
    Empty,
}

pub fn parse_line(line: &str) -> InputLine {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((line, ""));
    match word {
        "" => InputLine::Empty,
        "quit" | "q" => InputLine::Quit,
        "go" if !rest.is_empty() => InputLine::Command(MonitorCommand::Navigate {
            path: rest.to_string(),
            query: None,
        }),
        "query" if !rest.is_empty() => InputLine::Command(MonitorCommand::Requery(Query::parse(rest))),
        _ => InputLine::Command(MonitorCommand::Input(line.to_string())),
    }
}

/// Forwards stdin lines to the monitor until EOF or `quit`.
pub fn forward_lines(lines: impl Iterator<Item = std::io::Result<String>>, handle: &MonitorHandle) {
    for line in lines {
        let Ok(line) = line else { break };
        match parse_line(&line) {
            InputLine::Command(command) => handle.send(command),
            InputLine::Quit => break,
            InputLine::Empty => {}
        }
    }
    handle.shutdown();
}
