// SPDX-License-Identifier: Apache-2.0

//! The byte stream connecting the host to the device.

#[cfg(unix)]
pub mod tty;

use std::io::{self, ErrorKind};

/// A bidirectional byte stream with bounded receives.
///
/// `receive` blocks for at most an implementation-defined timeout and
/// returns `Ok(0)` when nothing arrived in time.
pub trait Transport {
    /// Sends bytes, returning how many were written.
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Receives up to `buf.len()` bytes.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes that can be received without blocking.
    fn pending(&mut self) -> io::Result<usize>;

    /// Sends every byte of `bytes`.
    fn send_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            match self.send(bytes)? {
                0 => return Err(ErrorKind::WriteZero.into()),
                n => bytes = &bytes[n..],
            }
        }
        Ok(())
    }

    /// Fills `buf` completely, failing with `TimedOut` if the device goes
    /// quiet first.
    fn receive_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut len = 0;
        while len < buf.len() {
            match self.receive(&mut buf[len..])? {
                0 => return Err(ErrorKind::TimedOut.into()),
                n => len += n,
            }
        }
        Ok(())
    }

    /// Receives one byte.
    fn receive_u8(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.receive_exact(&mut b)?;
        Ok(b[0])
    }

    /// Receives a little-endian `u16`.
    fn receive_u16(&mut self) -> io::Result<u16> {
        let mut b = [0u8; 2];
        self.receive_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).receive(buf)
    }

    fn pending(&mut self) -> io::Result<usize> {
        (**self).pending()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).receive(buf)
    }

    fn pending(&mut self) -> io::Result<usize> {
        (**self).pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    /// Hands out at most `burst` bytes per receive and writes at most
    /// `burst` bytes per send.
    struct Trickle {
        input: VecDeque<u8>,
        output: Vec<u8>,
        burst: usize,
    }

    impl Transport for Trickle {
        fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
            let n = bytes.len().min(self.burst);
            self.output.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.burst).min(self.input.len());
            for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn pending(&mut self) -> io::Result<usize> {
            Ok(self.input.len())
        }
    }

    fn trickle(input: &[u8]) -> Trickle {
        Trickle {
            input: input.iter().copied().collect(),
            output: Vec::new(),
            burst: 3,
        }
    }

    #[test]
    fn partial_transfers_are_completed() {
        let mut t = trickle(b"0123456789");

        let mut buf = [0u8; 8];
        t.receive_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"01234567");
        assert_eq!(t.receive_u16().unwrap(), u16::from_le_bytes(*b"89"));

        t.send_all(b"hello world").unwrap();
        assert_eq!(t.output, b"hello world");
    }

    #[test]
    fn silence_times_out() {
        let mut t = trickle(b"ab");

        let mut buf = [0u8; 4];
        let err = t.receive_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert_eq!(t.pending().unwrap(), 0);
    }

    #[test]
    fn through_references() {
        let mut t = trickle(b"x");
        let mut r: &mut dyn Transport = &mut t;
        assert_eq!(r.pending().unwrap(), 1);
        assert_eq!((&mut r).receive_u8().unwrap(), b'x');
    }
}
