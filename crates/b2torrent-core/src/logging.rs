//! Logging helpers that keep transfer and route details out of log output.
//!
//! Info-hashes, magnet descriptors and proxy endpoints identify what a user
//! downloads and how their traffic leaves the host. They are only ever
//! logged through one of these wrappers.

use std::fmt;

/// Redact an info-hash, showing only the first and last 4 hex characters.
pub struct RedactedHash<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedHash<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() > 12 && s.is_ascii() {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED HASH]")
        }
    }
}

impl<'a> fmt::Debug for RedactedHash<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a magnet descriptor, showing only its length.
pub struct RedactedMagnet<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedMagnet<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[magnet, {} chars]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedMagnet<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a proxy endpoint, keeping only the port.
pub struct RedactedHop<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedHop<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => write!(f, "[hop]:{}", port),
            _ => write!(f, "[hop]"),
        }
    }
}

impl<'a> fmt::Debug for RedactedHop<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
