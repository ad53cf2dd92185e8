// SPDX-License-Identifier: Apache-2.0

use super::{read_u16, read_u32, read_u8, remaining, round_up, Error, Exec, Format, Image, MAX_SIZE};

use std::io::{Read, Seek, SeekFrom};

use log::debug;

/// `"CPE\x01"` read as a little-endian word.
pub const MAGIC: u32 = 0x0145_5043;

/// Register code of the program counter in set-register chunks.
const REG_PC: u16 = 0x90;

/// Initial stack the loader gets for CPE files, which carry none.
const STACK: u32 = 0x801f_fff0;

enum Chunk {
    End,
    Load { addr: u32, size: u32 },
    SetPc(u32),
    SelectUnit,
}

impl Chunk {
    /// Reads a chunk header. The data of load chunks is left in the stream.
    fn read(reader: &mut impl Read) -> Result<Self, Error> {
        Ok(match read_u8(reader)? {
            0 => Chunk::End,
            1 => Chunk::Load {
                addr: read_u32(reader)?,
                size: read_u32(reader)?,
            },
            3 => match read_u16(reader)? {
                REG_PC => Chunk::SetPc(read_u32(reader)?),
                code => return Err(Error::UnsupportedRegister(code)),
            },
            8 => {
                read_u8(reader)?;
                Chunk::SelectUnit
            }
            kind => return Err(Error::UnknownChunk(kind)),
        })
    }
}

pub fn load(mut reader: impl Read + Seek) -> Result<Image, Error> {
    if read_u32(&mut reader)? != MAGIC {
        return Err(Error::UnknownFormat);
    }
    let body = reader.stream_position()?;

    // First pass: find the bounds of the image and the entry point.
    let mut lo = u64::MAX;
    let mut hi = 0u64;
    let mut total = 0u64;
    let mut entry = 0;
    loop {
        match Chunk::read(&mut reader)? {
            Chunk::End => break,
            Chunk::Load { addr, size } => {
                debug!("CPE segment: {:#010x} + {:#x}", addr, size);
                lo = lo.min(addr.into());
                hi = hi.max(u64::from(addr) + u64::from(size));
                total += u64::from(size);
                if remaining(&mut reader)? < u64::from(size) {
                    return Err(Error::Truncated);
                }
                reader.seek(SeekFrom::Current(size.into()))?;
            }
            Chunk::SetPc(pc) => entry = pc,
            Chunk::SelectUnit => (),
        }
    }

    if lo == u64::MAX {
        return Err(Error::NoSegments);
    }

    let span = total.max(hi - lo);
    if span > MAX_SIZE as u64 {
        return Err(Error::OutOfBounds);
    }
    let size = round_up(span as usize) as u32;
    let mut bytes = vec![0u8; size as usize];

    // Second pass: copy the segments into place.
    reader.seek(SeekFrom::Start(body))?;
    loop {
        match Chunk::read(&mut reader)? {
            Chunk::End => break,
            Chunk::Load { addr, size } => {
                let start = (u64::from(addr) - lo) as usize;
                reader.read_exact(&mut bytes[start..][..size as usize])?;
            }
            Chunk::SetPc(_) | Chunk::SelectUnit => (),
        }
    }

    let params = Exec {
        pc0: entry,
        t_addr: lo as u32,
        t_size: size,
        sp_addr: STACK,
        ..Default::default()
    };

    Ok(Image::new(Format::Cpe, params, bytes))
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use super::MAGIC;

    use std::io::Cursor;

    struct Cpe(Vec<u8>);

    impl Cpe {
        fn new() -> Self {
            Self(MAGIC.to_le_bytes().to_vec())
        }

        fn load(mut self, addr: u32, data: &[u8]) -> Self {
            self.0.push(1);
            self.0.extend_from_slice(&addr.to_le_bytes());
            self.0.extend_from_slice(&(data.len() as u32).to_le_bytes());
            self.0.extend_from_slice(data);
            self
        }

        fn reg(mut self, code: u16, value: u32) -> Self {
            self.0.push(3);
            self.0.extend_from_slice(&code.to_le_bytes());
            self.0.extend_from_slice(&value.to_le_bytes());
            self
        }

        fn unit(mut self, unit: u8) -> Self {
            self.0.extend_from_slice(&[8, unit]);
            self
        }

        fn end(mut self) -> Cursor<Vec<u8>> {
            self.0.push(0);
            Cursor::new(self.0)
        }
    }

    #[test]
    fn two_segments() {
        let a = vec![0x11u8; 0x300];
        let b = vec![0x22u8; 0x700];
        let file = Cpe::new()
            .unit(0)
            .load(0x8001_0000, &a)
            .reg(0x90, 0x8001_0100)
            .load(0x8001_0300, &b)
            .end();

        let image = Image::load(file).unwrap();
        assert_eq!(image.format(), Format::Cpe);
        assert_eq!(image.load_address(), 0x8001_0000);
        assert_eq!(image.entry(), 0x8001_0100);
        assert_eq!(image.size() as usize, round_up(0x300 + 0x700));
        assert_eq!(image.params().sp_addr, 0x801f_fff0);

        let bytes = image.bytes();
        assert_eq!(bytes.len(), 0x1000);
        assert!(bytes[..0x300].iter().all(|b| *b == 0x11));
        assert!(bytes[0x300..0xa00].iter().all(|b| *b == 0x22));
        assert!(bytes[0xa00..].iter().all(|b| *b == 0));
    }

    #[test]
    fn segments_out_of_order() {
        let file = Cpe::new()
            .load(0x8001_0010, b"tail")
            .load(0x8001_0000, b"head")
            .end();

        let image = Image::load(file).unwrap();
        assert_eq!(image.load_address(), 0x8001_0000);
        assert_eq!(image.entry(), 0);
        assert_eq!(&image.bytes()[..4], b"head");
        assert_eq!(&image.bytes()[0x10..0x14], b"tail");
    }

    #[test]
    fn sparse_segments_fit() {
        let file = Cpe::new()
            .load(0x8001_0000, &[1; 16])
            .load(0x8001_1000, &[2; 16])
            .end();

        let image = Image::load(file).unwrap();
        assert_eq!(image.size(), 0x1800);
        assert_eq!(image.bytes()[0x1000], 2);
    }

    #[test]
    fn oversized_segment() {
        let mut file = MAGIC.to_le_bytes().to_vec();
        file.push(1);
        file.extend_from_slice(&0x8001_0000u32.to_le_bytes());
        file.extend_from_slice(&0xffff_fff0u32.to_le_bytes());
        file.extend_from_slice(b"tiny");
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::Truncated
        ));
    }

    #[test]
    fn span_beyond_ram() {
        let file = Cpe::new()
            .load(0x0000_0000, &[1; 4])
            .load(0xfff0_0000, &[2; 4])
            .end();
        assert!(matches!(Image::load(file).unwrap_err(), Error::OutOfBounds));
    }

    #[test]
    fn bad_register() {
        let file = Cpe::new().load(0, &[0; 4]).reg(0x91, 0).end();
        assert!(matches!(
            Image::load(file).unwrap_err(),
            Error::UnsupportedRegister(0x91)
        ));
    }

    #[test]
    fn bad_chunk() {
        let mut file = Cpe::new().load(0, &[0; 4]).end().into_inner();
        let last = file.len() - 1;
        file[last] = 5;
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::UnknownChunk(5)
        ));
    }

    #[test]
    fn nothing_to_load() {
        let file = Cpe::new().reg(0x90, 0x8001_0000).end();
        assert!(matches!(Image::load(file).unwrap_err(), Error::NoSegments));
    }

    #[test]
    fn truncated_segment() {
        let mut file = Cpe::new().load(0x8001_0000, &[7; 64]).end().into_inner();
        file.truncate(file.len() - 20);
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::Truncated
        ));
    }
}
