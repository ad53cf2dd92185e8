// SPDX-License-Identifier: Apache-2.0

use super::{ConsoleOptions, PortOptions};

use clap::Args;

/// Show console output and serve file requests.
#[derive(Args, Debug)]
pub struct Options {}

impl Options {
    pub fn execute(self, port: &PortOptions, console: &ConsoleOptions) -> anyhow::Result<()> {
        let tty = port.open()?;
        console.listen(tty, &port.device)
    }
}
