//! Inbound codec for byte-stream terminals.
//!
//! Splits client bytes into [`TermEvent`]s for
//! [`tokio_util::codec::FramedRead`]. Lines end at `\n` with an optional
//! preceding `\r`. Ctrl-C (`0x03`) and Ctrl-Z (`0x1a`) produce events as soon
//! as they arrive, discarding any partially typed line. Telnet `IAC`
//! sequences are consumed: `IP` maps to an interrupt, `SUSP` to a suspend,
//! and option negotiation is dropped.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use super::TermEvent;
use crate::{AppError, Result};

/// Maximum length of a single input line: 64 KiB.
pub const MAX_LINE_BYTES: usize = 65_536;

const CTRL_C: u8 = 0x03;
const CTRL_Z: u8 = 0x1a;
const IAC: u8 = 0xff;
const IP: u8 = 0xf4;
const SUSP: u8 = 0xed;
const SB: u8 = 0xfa;
const SE: u8 = 0xf0;
const WILL: u8 = 0xfb;
const DONT: u8 = 0xfe;

/// Decoder turning terminal bytes into [`TermEvent`]s.
#[derive(Debug, Default)]
pub struct TermCodec;

impl TermCodec {
    /// Create a codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Remove `len` bytes starting at `at`, keeping what precedes and follows.
fn cut(src: &mut BytesMut, at: usize, len: usize) {
    let mut tail = src.split_off(at);
    tail.advance(len.min(tail.len()));
    src.unsplit(tail);
}

fn line_from(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).replace('\0', "")
}

impl Decoder for TermCodec {
    type Item = TermEvent;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TermEvent>> {
        loop {
            let Some(at) = src
                .iter()
                .position(|b| matches!(*b, b'\n' | CTRL_C | CTRL_Z | IAC))
            else {
                if src.len() > MAX_LINE_BYTES {
                    return Err(AppError::Io(format!(
                        "line too long: exceeded {MAX_LINE_BYTES} bytes"
                    )));
                }
                return Ok(None);
            };

            match src[at] {
                b'\n' => {
                    let line = src.split_to(at + 1);
                    return Ok(Some(TermEvent::Line(line_from(&line[..at]))));
                }
                CTRL_C => {
                    src.advance(at + 1);
                    return Ok(Some(TermEvent::Interrupt));
                }
                CTRL_Z => {
                    src.advance(at + 1);
                    return Ok(Some(TermEvent::Suspend));
                }
                _ => {
                    let Some(&command) = src.get(at + 1) else {
                        return Ok(None);
                    };
                    match command {
                        IP => {
                            src.advance(at + 2);
                            return Ok(Some(TermEvent::Interrupt));
                        }
                        SUSP => {
                            src.advance(at + 2);
                            return Ok(Some(TermEvent::Suspend));
                        }
                        WILL..=DONT => {
                            if src.len() < at + 3 {
                                return Ok(None);
                            }
                            cut(src, at, 3);
                        }
                        SB => {
                            let Some(end) = src[at..]
                                .windows(2)
                                .position(|pair| pair == [IAC, SE])
                            else {
                                return Ok(None);
                            };
                            cut(src, at, end + 2);
                        }
                        // Escaped 0xff data bytes and bare commands.
                        _ => cut(src, at, 2),
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<TermEvent>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        let line = line_from(&rest);
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(TermEvent::Line(line)))
        }
    }
}
