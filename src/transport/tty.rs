// SPDX-License-Identifier: Apache-2.0

//! Serial ports on Unix hosts.

use super::Transport;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

use log::debug;

/// How long a receive waits for the first byte.
pub const TIMEOUT: Duration = Duration::from_secs(1);

/// A raw 8N1 serial port.
#[derive(Debug)]
pub struct Tty {
    file: File,
}

fn speed(baud: u32) -> io::Result<libc::speed_t> {
    Ok(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921600 => libc::B921600,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate: {}", baud),
            ))
        }
    })
}

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

impl Tty {
    /// Opens and configures `path`. With `handshake` the port uses RTS/CTS
    /// flow control, otherwise the modem lines are ignored.
    pub fn open(path: impl AsRef<Path>, baud: u32, handshake: bool) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;

        let tty = Self { file };
        tty.configure(baud, handshake)?;

        debug!("opened {} at {} baud", path.display(), baud);
        Ok(tty)
    }

    fn configure(&self, baud: u32, handshake: bool) -> io::Result<()> {
        let speed = speed(baud)?;
        let fd = self.file.as_raw_fd();

        // SAFETY: termios is plain old data and every pointer handed to libc
        // refers to it or to the open descriptor.
        unsafe {
            let mut tty: libc::termios = std::mem::zeroed();
            tty.c_cflag = libc::CS8 | libc::CLOCAL | libc::CREAD;
            if handshake {
                tty.c_cflag |= libc::CRTSCTS;
            }
            tty.c_iflag = libc::IGNPAR;
            tty.c_cc[libc::VMIN] = 0;
            tty.c_cc[libc::VTIME] = 2;

            check(libc::cfsetispeed(&mut tty, speed))?;
            check(libc::cfsetospeed(&mut tty, speed))?;
            check(libc::tcsetattr(fd, libc::TCSANOW, &tty))?;
        }

        Ok(())
    }
}

impl Transport for Tty {
    fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let n = self.file.write(bytes)?;
        self.file.flush()?;
        Ok(n)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let timeout = TIMEOUT.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: a single valid pollfd.
        match check(unsafe { libc::poll(&mut fds, 1, timeout) }) {
            Ok(0) => Ok(0),
            Ok(_) => self.file.read(buf),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn pending(&mut self) -> io::Result<usize> {
        let mut count: libc::c_int = 0;

        // SAFETY: FIONREAD writes a single int.
        check(unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                libc::FIONREAD,
                &mut count as *mut libc::c_int,
            )
        })?;
        Ok(count.max(0) as usize)
    }
}
