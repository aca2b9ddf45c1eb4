//! Framing: newline-delimited text lines over a byte stream.

/// Upper bound on an unterminated line kept in the buffer.
pub const MAX_PARTIAL_LINE: usize = 64 * 1024; // 64 KiB

/// Accumulates received bytes and yields complete lines. The buffer is the only state;
/// a trailing partial line stays put until the next `feed`.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

/// Outcome of a `feed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Buffered,
    /// The unterminated tail grew past `MAX_PARTIAL_LINE` and was discarded.
    Overflowed { dropped: usize },
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn feed(&mut self, bytes: &[u8]) -> FeedOutcome {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_PARTIAL_LINE && !self.buf.contains(&b'\n') {
            let dropped = self.buf.len();
            self.buf.clear();
            return FeedOutcome::Overflowed { dropped };
        }
        FeedOutcome::Buffered
    }

    /// Extract the next complete line, trimmed of surrounding whitespace.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let rest = self.buf.split_off(pos + 1);
        let mut line = std::mem::replace(&mut self.buf, rest);
        line.pop();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Lazily drain all complete lines currently buffered.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { framer: self }
    }

    /// Bytes held for a line not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Iterator returned by [`LineFramer::drain`].
pub struct Drain<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Drain<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn splits_and_trims() {
        let mut f = LineFramer::new();
        f.feed(b"CLIENT_READY\r\n  BATTERY:0.5:Full \n");
        let lines: Vec<String> = f.drain().collect();
        assert_eq!(lines, vec!["CLIENT_READY", "BATTERY:0.5:Full"]);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn keeps_partial_tail() {
        let mut f = LineFramer::new();
        f.feed(b"EMA_Sess");
        assert_eq!(f.drain().count(), 0);
        f.feed(b"ion_ACK\nSession_");
        assert_eq!(f.drain().collect::<Vec<_>>(), vec!["EMA_Session_ACK"]);
        assert_eq!(f.pending(), "Session_".len());
        f.feed(b"Complete\n");
        assert_eq!(f.drain().collect::<Vec<_>>(), vec!["Session_Complete"]);
    }

    #[test]
    fn drain_is_restartable() {
        let mut f = LineFramer::new();
        f.feed(b"a\nb\n");
        let mut d = f.drain();
        assert_eq!(d.next().as_deref(), Some("a"));
        drop(d);
        assert_eq!(f.drain().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(f.drain().next(), None);
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let text = "CLIENT_READY\nBATTERY:0.73:Charging\nLIVE_CHECK_ACK:7:LATENCY:42.5\n\
                    free text with spaces \nBCI_Sync:x\n\nEMA_Session_ACK\ntail";
        let expected: Vec<String> = {
            let complete = &text[..text.rfind('\n').unwrap()];
            complete.split('\n').map(|l| l.trim().to_string()).collect()
        };
        let bytes = text.as_bytes();
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let mut f = LineFramer::new();
            let mut got = Vec::new();
            let mut i = 0;
            while i < bytes.len() {
                let n = rng.gen_range(1..=8).min(bytes.len() - i);
                f.feed(&bytes[i..i + n]);
                got.extend(f.drain());
                i += n;
            }
            assert_eq!(got, expected);
            assert_eq!(f.pending(), "tail".len());
        }
    }

    #[test]
    fn invalid_utf8_stays_on_its_line() {
        let mut f = LineFramer::new();
        f.feed(b"ok\n\xff\xfe\nnext\n");
        let lines: Vec<String> = f.drain().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ok");
        assert_eq!(lines[2], "next");
    }

    #[test]
    fn oversized_partial_line_is_dropped() {
        let mut f = LineFramer::new();
        let junk = vec![b'x'; MAX_PARTIAL_LINE + 1];
        assert_eq!(
            f.feed(&junk),
            FeedOutcome::Overflowed {
                dropped: MAX_PARTIAL_LINE + 1
            }
        );
        assert_eq!(f.pending(), 0);
        f.feed(b"CLIENT_READY\n");
        assert_eq!(f.drain().collect::<Vec<_>>(), vec!["CLIENT_READY"]);
    }
}
