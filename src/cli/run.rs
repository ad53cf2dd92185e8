// SPDX-License-Identifier: Apache-2.0

use super::{progress, ConsoleOptions, PortOptions};

use siobridge::image::Image;
use siobridge::upload::{self, Protocol};

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

/// Upload an executable, run it and listen to the console.
#[derive(Args, Debug)]
pub struct Options {
    /// Send the shorter parameter block older loaders expect
    #[clap(long)]
    pub legacy: bool,

    /// Exit once the upload is done
    #[clap(long)]
    pub no_console: bool,

    /// PS-EXE, CPE or ELF executable
    #[clap(value_name = "EXE", parse(from_os_str))]
    pub exe: PathBuf,
}

impl Options {
    pub fn execute(self, port: &PortOptions, console: &ConsoleOptions) -> anyhow::Result<()> {
        let image = Image::open(&self.exe)
            .with_context(|| format!("unable to load {}", self.exe.display()))?;

        let mut tty = port.open()?;

        let opts = upload::Options {
            protocol: if self.legacy {
                Protocol::Legacy
            } else {
                Protocol::Current
            },
            ..Default::default()
        };

        eprintln!("Uploading {}...", self.exe.display());
        upload::executable(&mut tty, &image, &opts, progress).context("upload failed")?;

        if self.no_console {
            return Ok(());
        }

        console.listen(tty, &port.device)
    }
}
