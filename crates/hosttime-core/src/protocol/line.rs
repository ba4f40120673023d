//! Permissive decoding of serial line bytes.
//!
//! Serial links glitch: a device reset mid-line, a baud mismatch, or line noise
//! all produce bytes that are not valid UTF-8.  None of that may end a session,
//! so invalid sequences are dropped and the rest of the line is kept.

use tracing::trace;

/// Decodes one raw line into trimmed text.
///
/// Invalid UTF-8 sequences are dropped (not replaced), then leading and
/// trailing whitespace, including the `\r\n` terminator, is trimmed.  An
/// all-whitespace or all-garbage line decodes to the empty string.
///
/// # Examples
///
/// ```rust
/// use hosttime_core::decode_line;
///
/// assert_eq!(decode_line(b"GETTIME\r\n"), "GETTIME");
/// assert_eq!(decode_line(b"RTC:\xff 2000\n"), "RTC: 2000");
/// assert_eq!(decode_line(b"  \n"), "");
/// ```
pub fn decode_line(raw: &[u8]) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut dropped = 0usize;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                // `None` means the input ended inside a multi-byte sequence.
                let skip = e.error_len().unwrap_or(after.len());
                dropped += skip;
                rest = &after[skip..];
            }
        }
    }

    if dropped > 0 {
        trace!("dropped {dropped} undecodable byte(s) from serial line");
    }

    text.trim().to_string()
}
