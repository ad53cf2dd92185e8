// SPDX-License-Identifier: Apache-2.0

use siobridge::crc::{crc32, CRC32_SEED};
use siobridge::image::Image;

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

/// Show how an executable would be uploaded, without touching the port.
#[derive(Args, Debug)]
pub struct Options {
    /// PS-EXE, CPE or ELF executable
    #[clap(value_name = "EXE", parse(from_os_str))]
    pub exe: PathBuf,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        let image = Image::open(&self.exe)
            .with_context(|| format!("unable to load {}", self.exe.display()))?;

        let p = image.params();
        let payload = &image.bytes()[..image.size() as usize];

        println!("format:  {}", image.format());
        println!("pc0:     {:#010x}", p.pc0);
        println!("gp0:     {:#010x}", p.gp0);
        println!("t_addr:  {:#010x}", p.t_addr);
        println!("t_size:  {:#x}", p.t_size);
        println!("d_addr:  {:#010x}", p.d_addr);
        println!("d_size:  {:#x}", p.d_size);
        println!("b_addr:  {:#010x}", p.b_addr);
        println!("b_size:  {:#x}", p.b_size);
        println!("sp_addr: {:#010x}", p.sp_addr);
        println!("sp_size: {:#x}", p.sp_size);
        println!("crc32:   {:#010x}", crc32(payload, CRC32_SEED));

        Ok(())
    }
}
