//! Re-segmentation of a streamed reply into separate chat messages.
//!
//! The model is asked to put a separator token between the messages it wants
//! sent. Fragments arrive with arbitrary boundaries, so the token may be
//! split across two of them. [`MessageBuilder`] buffers the open line and
//! seals a line the moment a complete separator shows up.

/// Separator used when none is configured.
pub const DEFAULT_SEPARATOR: &str = "$NEXTMESSAGE$";

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    separator: String,
    raw: String,
    /// Sealed lines followed by the open line. Never empty.
    lines: Vec<String>,
}

impl MessageBuilder {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            raw: String::new(),
            lines: vec![String::new()],
        }
    }

    /// Feed the next fragment.
    ///
    /// Returns the lines sealed by this fragment, in order. Empty sealed
    /// lines (consecutive separators, or one at the very start) are returned
    /// too; deciding whether to send them is up to the caller. An empty
    /// separator disables segmentation.
    pub fn append(&mut self, fragment: &str) -> Vec<String> {
        self.raw.push_str(fragment);
        if self.separator.is_empty() {
            self.open_mut().push_str(fragment);
            return Vec::new();
        }

        let mut open = std::mem::take(self.open_mut());
        open.push_str(fragment);

        let mut parts: Vec<String> = open
            .split(self.separator.as_str())
            .map(str::to_owned)
            .collect();
        // `split` always yields at least one part.
        let rest = parts.pop().unwrap_or_default();
        let sealed = parts;

        if let Some((first, later)) = sealed.split_first() {
            *self.open_mut() = first.clone();
            self.lines.extend(later.iter().cloned());
            self.lines.push(rest);
        } else {
            *self.open_mut() = rest;
        }
        sealed
    }

    /// Everything appended so far, separators included.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The text after the last separator seen.
    pub fn open_line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    /// Sealed lines followed by the open line.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn sealed_count(&self) -> usize {
        self.lines.len() - 1
    }

    /// Take the open line for a final flush, leaving it empty. The builder
    /// never emits it by itself.
    pub fn take_open(&mut self) -> String {
        std::mem::take(self.open_mut())
    }

    pub fn into_raw(self) -> String {
        self.raw
    }

    fn open_mut(&mut self) -> &mut String {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        let last = self.lines.len() - 1;
        &mut self.lines[last]
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}
