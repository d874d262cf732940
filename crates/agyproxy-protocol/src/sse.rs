//! Incremental server-sent-events decoder.
//!
//! Feed it network chunks as they arrive; complete events come back as soon
//! as their terminating blank line is seen. Field handling follows the
//! WHATWG rules the upstream actually exercises: `data` and `event` are
//! honored, comments and other fields are dropped, multi-line data is
//! joined with `\n`.

use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub name: Option<String>,
    pub data: String,
}

impl Event {
    /// The OpenAI-style stream terminator.
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }
}

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    pending: String,
    name: Option<String>,
    data: Vec<String>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalid UTF-8 chunks are dropped rather than poisoning the stream.
    pub fn feed_bytes(&mut self, chunk: &Bytes) -> Vec<Event> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.feed(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<Event> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                self.flush_into(&mut out);
            } else {
                self.take_line(line);
            }
        }
        out
    }

    /// Call at end of stream to salvage an event without a trailing blank
    /// line.
    pub fn finish(&mut self) -> Vec<Event> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.take_line(tail.trim_end_matches('\r'));
        }
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    fn take_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => {
                self.name = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => {}
        }
    }

    fn flush_into(&mut self, out: &mut Vec<Event>) {
        if self.name.is_none() && self.data.is_empty() {
            return;
        }
        out.push(Event {
            name: self.name.take(),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}
