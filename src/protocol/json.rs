//! Minimal JSON writer for outbound control messages
//!
//! Writes straight into a `String`. Supports the shapes the control
//! protocol needs: primitives, strings, flat lists and flat maps keyed by
//! channel index.

use std::collections::BTreeMap;
use std::fmt::Write;

/// Single-object JSON writer
#[derive(Debug)]
pub struct JsonWriter {
    buf: String,
    empty: bool,
}

impl JsonWriter {
    /// Start a new object
    #[must_use]
    pub fn object() -> Self {
        let mut buf = String::with_capacity(128);
        buf.push('{');
        Self { buf, empty: true }
    }

    fn key(&mut self, key: &str) {
        if self.empty {
            self.empty = false;
        } else {
            self.buf.push(',');
        }
        push_escaped(&mut self.buf, key);
        self.buf.push(':');
    }

    /// Add a string field
    #[must_use]
    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.key(key);
        push_escaped(&mut self.buf, value);
        self
    }

    /// Add a signed integer field
    #[must_use]
    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.key(key);
        let _ = write!(self.buf, "{value}");
        self
    }

    /// Add an unsigned integer field
    #[must_use]
    pub fn uint(mut self, key: &str, value: u64) -> Self {
        self.key(key);
        let _ = write!(self.buf, "{value}");
        self
    }

    /// Add a float field; non-finite values are written as 0
    #[must_use]
    pub fn float(mut self, key: &str, value: f32) -> Self {
        self.key(key);
        push_float(&mut self.buf, value);
        self
    }

    /// Add a boolean field
    #[must_use]
    pub fn bool(mut self, key: &str, value: bool) -> Self {
        self.key(key);
        self.buf.push_str(if value { "true" } else { "false" });
        self
    }

    /// Add a list of strings
    #[must_use]
    pub fn string_list(mut self, key: &str, values: &[&str]) -> Self {
        self.key(key);
        self.buf.push('[');
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            push_escaped(&mut self.buf, v);
        }
        self.buf.push(']');
        self
    }

    /// Add a list of channel indices
    #[must_use]
    pub fn channel_list(mut self, key: &str, values: &[u32]) -> Self {
        self.key(key);
        self.buf.push('[');
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            let _ = write!(self.buf, "{v}");
        }
        self.buf.push(']');
        self
    }

    /// Add a map of channel index to float, keys stringified
    #[must_use]
    pub fn float_map(mut self, key: &str, values: &BTreeMap<u32, f32>) -> Self {
        self.key(key);
        self.buf.push('{');
        for (i, (ch, v)) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            let _ = write!(self.buf, "\"{ch}\":");
            push_float(&mut self.buf, *v);
        }
        self.buf.push('}');
        self
    }

    /// Add a map of channel index to bool, keys stringified
    #[must_use]
    pub fn bool_map(mut self, key: &str, values: &BTreeMap<u32, bool>) -> Self {
        self.key(key);
        self.buf.push('{');
        for (i, (ch, v)) in values.iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            let _ = write!(self.buf, "\"{ch}\":{v}");
        }
        self.buf.push('}');
        self
    }

    /// Close the object and return the document
    #[must_use]
    pub fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }
}

fn push_float(buf: &mut String, value: f32) {
    if value.is_finite() {
        let _ = write!(buf, "{value}");
    } else {
        buf.push('0');
    }
}

fn push_escaped(buf: &mut String, s: &str) {
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if u32::from(c) < 0x20 => {
                let _ = write!(buf, "\\u{:04x}", u32::from(c));
            }
            c => buf.push(c),
        }
    }
    buf.push('"');
}
