use std::mem;

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes may be pushed in arbitrary pieces; complete events are returned as
/// their joined `data` payloads. Comment lines (the server's keep-alives) and
/// the `event`, `id` and `retry` fields are ignored.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    line: Vec<u8>,
    data: String,
    has_data: bool,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw body bytes and returns every event they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            let line = mem::take(&mut self.line);
            self.process_line(&line, &mut events);
            rest = &rest[pos + 1..];
        }
        self.line.extend_from_slice(rest);
        events
    }

    fn process_line(&mut self, line: &[u8], events: &mut Vec<String>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            if self.has_data {
                events.push(mem::take(&mut self.data));
                self.has_data = false;
            }
            return;
        }
        if line[0] == b':' {
            return;
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text.as_ref(), ""),
        };
        if field == "data" {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
        }
    }
}
