// SPDX-License-Identifier: Apache-2.0

//! The console loop: echo device output and service SIOFS requests found
//! in it.

use crate::siofs::{Command, Siofs};
use crate::transport::Transport;

use std::io::{self, Write};
use std::thread::sleep;
use std::time::Duration;

use log::{trace, warn};

/// Largest receive per poll.
pub const CHUNK: usize = 256;

/// Idle delay between polls.
pub const IDLE: Duration = Duration::from_millis(1);

/// How console output is rendered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Display {
    /// Raw bytes, as the device sent them.
    Text,
    /// `xx,` per byte, four to a line, `--` after every receive.
    Hex,
}

impl Default for Display {
    fn default() -> Self {
        Display::Text
    }
}

/// Watches a transport, servicing SIOFS frames and forwarding everything
/// else to `sink`.
pub struct Monitor<T, W> {
    transport: T,
    siofs: Siofs,
    sink: W,
    display: Display,
}

impl<T: Transport, W: Write> Monitor<T, W> {
    /// Creates a monitor over `transport` that writes console output to `sink`.
    pub fn new(transport: T, siofs: Siofs, sink: W, display: Display) -> Self {
        Self {
            transport,
            siofs,
            sink,
            display,
        }
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Takes the monitor apart.
    pub fn into_parts(self) -> (T, Siofs, W) {
        (self.transport, self.siofs, self.sink)
    }

    /// Handles whatever is waiting. Returns `false` when there was nothing.
    pub fn poll(&mut self) -> io::Result<bool> {
        if self.transport.pending()? == 0 {
            return Ok(false);
        }

        let mut buf = [0u8; CHUNK];
        let len = self.transport.receive(&mut buf)?;
        if len == 0 {
            return Ok(false);
        }

        self.process(&buf[..len])?;
        Ok(true)
    }

    /// Runs until the transport or the sink fails.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            if !self.poll()? {
                sleep(IDLE);
            }
        }
    }

    /// Services the first request in `buf`, then shows the rest.
    pub fn process(&mut self, buf: &[u8]) -> io::Result<Option<Command>> {
        trace!("received {} bytes", buf.len());

        let (cmd, rest) = match Command::scan(buf) {
            None => (None, buf.to_vec()),
            Some((at, cmd)) => {
                if let Err(e) = self.siofs.query(&mut self.transport, cmd) {
                    warn!("{} aborted: {}", cmd, e);
                }

                let mut rest = buf[..at].to_vec();
                rest.extend_from_slice(&buf[at + Command::FRAME..]);
                (Some(cmd), rest)
            }
        };

        self.show(&rest)?;
        Ok(cmd)
    }

    fn show(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.display {
            Display::Text => self.sink.write_all(bytes)?,
            Display::Hex => {
                for (i, b) in bytes.iter().enumerate() {
                    write!(self.sink, "{:02x},", b)?;
                    if i % 4 == 3 {
                        writeln!(self.sink)?;
                    }
                }
                write!(self.sink, "\n--\n")?;
            }
        }

        self.sink.flush()
    }
}
