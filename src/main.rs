// SPDX-License-Identifier: Apache-2.0

//! `siobridge`: upload executables over a serial link and serve the
//! device's file requests.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let app = cli::Options::parse();
    app.execute()
}
