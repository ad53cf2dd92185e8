// SPDX-License-Identifier: Apache-2.0

use super::{progress, PortOptions};

use siobridge::upload::{self, Kind};

use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

/// Accepts `80010000` as well as `0x80010000`.
fn parse_address(s: &str) -> Result<u32, ParseIntError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16)
}

/// Upload a file to an address in device memory.
#[derive(Args, Debug)]
pub struct Options {
    /// File to upload as-is
    #[clap(value_name = "FILE", parse(from_os_str))]
    pub file: PathBuf,

    /// Load address, in hex
    #[clap(value_name = "ADDR", parse(try_from_str = parse_address))]
    pub addr: u32,
}

impl Options {
    pub fn execute(self, port: &PortOptions) -> anyhow::Result<()> {
        let mut tty = port.open()?;

        eprintln!("Uploading {}...", self.file.display());
        upload::binary_file(
            &mut tty,
            &self.file,
            self.addr,
            Kind::Binary,
            &Default::default(),
            progress,
        )
        .with_context(|| format!("unable to upload {}", self.file.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        assert_eq!(parse_address("80010000").unwrap(), 0x8001_0000);
        assert_eq!(parse_address("0x801F0000").unwrap(), 0x801f_0000);
        assert!(parse_address("zz").is_err());
        assert!(parse_address("123456789").is_err());
    }
}
