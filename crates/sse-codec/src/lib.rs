//! Incremental Server-Sent Events decoder.
//!
//! The decoder is fed successive byte slices exactly as they arrive from the
//! wire and yields complete events without losing bytes across chunk
//! boundaries. Line endings `\r\n`, `\r`, and `\n` are treated uniformly;
//! comment lines (leading `:`) are discarded; multiple `data:` lines within
//! one event concatenate with `\n`.

/// A complete decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The `event:` field; defaults to `message` when absent.
    pub name: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// The `retry:` field, when it parses as an integer.
    pub retry: Option<u64>,
}

impl Event {
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.name == "message"
    }
}

/// Restartable decoder state.
///
/// Bytes that do not yet form a complete line (or whose terminating `\r`
/// might be the first half of a `\r\n` pair split across chunks) stay
/// buffered until the next [`EventDecoder::feed`].
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    name: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held: the unterminated line remainder plus all field
    /// lines of the event under construction. Callers enforcing an
    /// accumulation cap should measure this after each feed.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        let pending_fields: usize = self.data_lines.iter().map(String::len).sum::<usize>()
            + self.name.as_ref().map_or(0, String::len)
            + self.id.as_ref().map_or(0, String::len);
        self.buf.len() + pending_fields
    }

    /// Feed one chunk and collect every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0usize;
        let mut i = 0usize;
        while i < self.buf.len() {
            match self.buf[i] {
                b'\n' => {
                    let line = self.buf[consumed..i].to_vec();
                    consumed = i + 1;
                    i = consumed;
                    if let Some(ev) = self.take_line(&line) {
                        events.push(ev);
                    }
                }
                b'\r' => {
                    if i + 1 == self.buf.len() {
                        // A trailing CR may be half of a CRLF pair; wait for more bytes.
                        break;
                    }
                    let line = self.buf[consumed..i].to_vec();
                    consumed = if self.buf[i + 1] == b'\n' { i + 2 } else { i + 1 };
                    i = consumed;
                    if let Some(ev) = self.take_line(&line) {
                        events.push(ev);
                    }
                }
                _ => i += 1,
            }
        }
        self.buf.drain(..consumed);
        events
    }

    /// Process one complete line; a blank line dispatches the pending event.
    fn take_line(&mut self, line: &[u8]) -> Option<Event> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line[0] == b':' {
            // Comment (keep-alive ping).
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Event> {
        let name = self.name.take();
        let id = self.id.take();
        let retry = self.retry.take();
        if self.data_lines.is_empty() {
            // Per the event stream processing model, an event without data is
            // not dispatched (this is what makes interleaved comments inert).
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(Event {
            name: name.unwrap_or_else(|| "message".to_string()),
            data,
            id,
            retry,
        })
    }
}
