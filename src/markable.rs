//! A [MarkableReader] lets a non-seekable stream be rewound a bounded distance.
//!
//! Bytes read after [MarkableReader::save_position] are kept, up to the requested limit, so that
//! [MarkableReader::reset] can replay them.  Reading past the limit invalidates the mark.
use std::io::{Error, ErrorKind, Read, Result};

pub struct MarkableReader<R> {
    inner: R,
    /// Logical position in the stream.
    position: u64,
    /// Position of the current mark, if it is still valid.
    mark: Option<u64>,
    limit: u64,
    /// Every byte from `mark` onward that has come out of `inner`.
    history: Vec<u8>,
}

impl<R: Read> MarkableReader<R> {
    pub fn new(inner: R) -> MarkableReader<R> {
        MarkableReader {
            inner,
            position: 0,
            mark: None,
            limit: 0,
            history: vec![],
        }
    }

    /// Remember the current position, allowing up to `read_limit` further bytes before it is forgotten.
    pub fn save_position(&mut self, read_limit: usize) -> u64 {
        match self.mark {
            // Still replaying; keep what lies ahead of us.
            Some(m) if self.position < m + self.history.len() as u64 => {
                self.history.drain(..(self.position - m) as usize);
            }
            _ => self.history.clear(),
        }
        self.mark = Some(self.position);
        self.limit = read_limit as u64;
        self.position
    }

    /// Go back to a position returned by [MarkableReader::save_position].
    pub fn reset(&mut self, token: u64) -> Result<()> {
        match self.mark {
            Some(m) if token >= m && token <= m + self.history.len() as u64 => {
                self.position = token;
                Ok(())
            }
            _ => Err(Error::new(
                ErrorKind::InvalidInput,
                "position is outside the look-ahead window",
            )),
        }
    }
}

impl<R: Read> Read for MarkableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(m) = self.mark {
            let end = m + self.history.len() as u64;
            if self.position < end {
                let start = (self.position - m) as usize;
                let available = &self.history[start..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.position += n as u64;
                return Ok(n);
            }
        }

        let n = self.inner.read(buf)?;
        if self.mark.is_some() {
            if self.history.len() as u64 + n as u64 <= self.limit {
                self.history.extend_from_slice(&buf[..n]);
            } else {
                self.mark = None;
                self.history = vec![];
            }
        }
        self.position += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> Vec<u8> {
        (0..=255u8).cycle().take(1000).collect()
    }

    #[test]
    fn test_reset_replays() {
        let d = data();
        let mut r = MarkableReader::new(&d[..]);
        let mark = r.save_position(100);

        let mut first = [0u8; 50];
        r.read_exact(&mut first).unwrap();
        r.reset(mark).unwrap();

        let mut all = vec![];
        r.read_to_end(&mut all).unwrap();
        assert_eq!(all, data());
        assert_eq!(&first[..], &data()[..50]);
    }

    #[test]
    fn test_limit_invalidates_mark() {
        let d = data();
        let mut r = MarkableReader::new(&d[..]);
        let mark = r.save_position(10);
        let mut buf = [0u8; 20];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(r.reset(mark).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_remark_while_replaying() {
        let d = data();
        let mut r = MarkableReader::new(&d[..]);
        let first = r.save_position(100);
        let mut buf = [0u8; 40];
        r.read_exact(&mut buf).unwrap();
        r.reset(first).unwrap();
        r.read_exact(&mut buf[..10]).unwrap();

        let second = r.save_position(100);
        assert_eq!(second, 10);
        let mut a = [0u8; 60];
        r.read_exact(&mut a).unwrap();
        r.reset(second).unwrap();
        let mut b = [0u8; 60];
        r.read_exact(&mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..], &data()[10..70]);
    }
}
