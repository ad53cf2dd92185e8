// SPDX-License-Identifier: Apache-2.0

use super::{progress, PortOptions};

use siobridge::upload::{self, Kind};

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

/// Upload a patch binary for the loader.
#[derive(Args, Debug)]
pub struct Options {
    /// Patch binary
    #[clap(value_name = "FILE", parse(from_os_str))]
    pub file: PathBuf,
}

impl Options {
    pub fn execute(self, port: &PortOptions) -> anyhow::Result<()> {
        let mut tty = port.open()?;

        eprintln!("Uploading patch {}...", self.file.display());
        upload::binary_file(
            &mut tty,
            &self.file,
            0,
            Kind::Patch,
            &Default::default(),
            progress,
        )
        .with_context(|| format!("unable to upload {}", self.file.display()))
    }
}
