//! LDIF (RFC 2849) encoding of directory entries.
//!
//! Values that are SAFE-STRINGs are written as `attr: value`; anything else,
//! and every binary value, is written as `attr:: <base64>` on a single line.

use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::entry::{AttributeValue, EntryRecord};

/// Line terminator used between LDIF lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// The platform's native line separator.
    #[must_use]
    pub const fn platform() -> Self {
        if cfg!(windows) {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    /// The terminator characters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

impl Default for LineEnding {
    fn default() -> Self {
        Self::platform()
    }
}

/// Returns `true` if `value` can be written verbatim after `attr: `.
///
/// Implements the RFC 2849 SAFE-STRING production: only ASCII, no NUL,
/// CR or LF, and no leading space, colon or less-than sign. Values ending
/// in a space are also rejected, as the RFC recommends.
#[must_use]
pub fn is_safe_string(value: &str) -> bool {
    let bytes = value.as_bytes();
    let Some((&first, _)) = bytes.split_first() else {
        return true;
    };
    if matches!(first, b':' | b' ' | b'<') || bytes.last() == Some(&b' ') {
        return false;
    }
    !bytes
        .iter()
        .any(|&b| b > 127 || b == b'\0' || b == b'\r' || b == b'\n')
}

/// Encodes entries as LDIF records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdifEncoder {
    line_ending: LineEnding,
}

impl LdifEncoder {
    /// Creates an encoder using the platform line separator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with an explicit line separator.
    #[must_use]
    pub const fn with_line_ending(line_ending: LineEnding) -> Self {
        Self { line_ending }
    }

    /// Encodes one entry: the `dn` line followed by one line per value.
    ///
    /// Every line, including the last, ends with the line separator.
    #[must_use]
    pub fn encode(&self, entry: &EntryRecord) -> String {
        let mut out = String::new();
        self.push_text(&mut out, "dn", entry.dn());
        for attr in &entry.attributes {
            for value in &attr.values {
                match value {
                    AttributeValue::Text(text) => self.push_text(&mut out, &attr.name, text),
                    AttributeValue::Binary(bytes) => self.push_base64(&mut out, &attr.name, bytes),
                }
            }
        }
        out
    }

    fn push_text(&self, out: &mut String, name: &str, value: &str) {
        if is_safe_string(value) {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str(self.line_ending.as_str());
        } else {
            self.push_base64(out, name, value.as_bytes());
        }
    }

    fn push_base64(&self, out: &mut String, name: &str, bytes: &[u8]) {
        out.push_str(name);
        out.push_str(":: ");
        out.push_str(&STANDARD.encode(bytes));
        out.push_str(self.line_ending.as_str());
    }
}

/// Encodes one entry with the platform line separator.
#[must_use]
pub fn to_ldif(entry: &EntryRecord) -> String {
    LdifEncoder::new().encode(entry)
}

/// Writes a multi-record LDIF document.
///
/// Records are separated by an empty line. An optional `version: 1` header
/// precedes the first record.
#[derive(Debug)]
pub struct LdifWriter<W: Write> {
    inner: W,
    encoder: LdifEncoder,
    version_header: bool,
    records: usize,
}

impl<W: Write> LdifWriter<W> {
    /// Creates a writer with the platform line separator and no header.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            encoder: LdifEncoder::new(),
            version_header: false,
            records: 0,
        }
    }

    /// Emits `version: 1` before the first record.
    #[must_use]
    pub fn with_version_header(mut self) -> Self {
        self.version_header = true;
        self
    }

    /// Uses an explicit line separator.
    #[must_use]
    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.encoder = LdifEncoder::with_line_ending(line_ending);
        self
    }

    /// Writes one record.
    ///
    /// ## Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn write_entry(&mut self, entry: &EntryRecord) -> io::Result<()> {
        let eol = self.encoder.line_ending.as_str();
        if self.records == 0 {
            if self.version_header {
                write!(self.inner, "version: 1{eol}{eol}")?;
            }
        } else {
            self.inner.write_all(eol.as_bytes())?;
        }
        self.inner.write_all(self.encoder.encode(entry).as_bytes())?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Flushes and returns the underlying writer.
    ///
    /// ## Errors
    ///
    /// Returns any error from flushing.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
