// SPDX-License-Identifier: Apache-2.0

use super::{round_up, Error, Exec, Format, Image, MAX_SIZE};

use std::io::Read;

use goblin::elf::{header::*, program_header::*, Elf};
use log::{debug, warn};

/// The first 64 KiB of main RAM belong to the BIOS kernel.
const KERNEL_AREA: u32 = 0x1_0000;

/// Little-endian ELF32 MIPS executables.
///
/// Headers flagged read-only (`p_flags == PF_R`) carry metadata such as
/// `.MIPS.abiflags` and are not loaded.
pub fn load(mut reader: impl Read) -> Result<Image, Error> {
    let mut file = Vec::new();
    reader.read_to_end(&mut file)?;

    let elf = Elf::parse(&file)?;

    if elf.header.e_type != ET_EXEC {
        return Err(Error::Unsupported("e_type"));
    }

    if elf.header.e_machine != EM_MIPS {
        return Err(Error::Unsupported("e_machine"));
    }

    if elf.header.e_ident[EI_CLASS] != ELFCLASS32 {
        return Err(Error::Unsupported("e_ident[EI_CLASS]"));
    }

    if elf.header.e_ident[EI_DATA] != ELFDATA2LSB {
        return Err(Error::Unsupported("e_ident[EI_DATA]"));
    }

    let headers: Vec<&ProgramHeader> = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_flags != PF_R)
        .collect();

    let last = headers.last().ok_or(Error::NoSegments)?;
    let lo = headers.iter().map(|ph| ph.p_vaddr).min().unwrap_or_default();
    let hi = headers.iter().map(|ph| ph.p_vaddr).max().unwrap_or_default();

    let size = usize::try_from(hi - lo + last.p_filesz)
        .ok()
        .filter(|size| *size <= MAX_SIZE)
        .ok_or(Error::OutOfBounds)?;
    let size = round_up(size) as u32;
    let base = u32::try_from(lo).map_err(|_| Error::OutOfBounds)?;

    if matches!(base >> 24, 0x00 | 0x80 | 0xa0) && base & 0x00ff_ffff < KERNEL_AREA {
        warn!("Program text address {:#010x} overlaps kernel area!", base);
    }

    let mut bytes = vec![0u8; size as usize];
    for ph in headers {
        debug!(
            "ELF segment: {:#010x} + {:#x} from offset {:#x}",
            ph.p_vaddr, ph.p_filesz, ph.p_offset
        );

        let src = file.get(ph.file_range()).ok_or(Error::OutOfBounds)?;
        let start = (ph.p_vaddr - lo) as usize;
        bytes
            .get_mut(start..start + src.len())
            .ok_or(Error::OutOfBounds)?
            .copy_from_slice(src);
    }

    let params = Exec {
        pc0: elf.header.e_entry as u32,
        t_addr: base,
        t_size: size,
        ..Default::default()
    };

    Ok(Image::new(Format::Elf, params, bytes))
}

#[cfg(test)]
mod tests {
    use super::super::*;

    use std::io::Cursor;

    use goblin::elf::header::{EM_MIPS, EM_X86_64, ET_DYN, ET_EXEC};
    use goblin::elf::program_header::PT_LOAD;

    const EHSIZE: usize = 52;
    const PHSIZE: usize = 32;

    struct Segment<'a> {
        vaddr: u32,
        flags: u32,
        data: &'a [u8],
    }

    fn elf32(e_type: u16, machine: u16, entry: u32, segments: &[Segment<'_>]) -> Vec<u8> {
        let mut file = vec![0u8; EHSIZE];
        file[..4].copy_from_slice(b"\x7fELF");
        file[4] = 1; // ELFCLASS32
        file[5] = 1; // ELFDATA2LSB
        file[6] = 1; // EV_CURRENT
        file[16..18].copy_from_slice(&e_type.to_le_bytes());
        file[18..20].copy_from_slice(&machine.to_le_bytes());
        file[20..24].copy_from_slice(&1u32.to_le_bytes());
        file[24..28].copy_from_slice(&entry.to_le_bytes());
        file[28..32].copy_from_slice(&(EHSIZE as u32).to_le_bytes());
        file[40..42].copy_from_slice(&(EHSIZE as u16).to_le_bytes());
        file[42..44].copy_from_slice(&(PHSIZE as u16).to_le_bytes());
        file[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        let mut offset = EHSIZE + PHSIZE * segments.len();
        for seg in segments {
            let fields = [
                PT_LOAD,
                offset as u32,
                seg.vaddr,
                seg.vaddr,
                seg.data.len() as u32,
                seg.data.len() as u32,
                seg.flags,
                4,
            ];
            for field in fields {
                file.extend_from_slice(&field.to_le_bytes());
            }
            offset += seg.data.len();
        }

        for seg in segments {
            file.extend_from_slice(seg.data);
        }

        file
    }

    #[test]
    fn skips_read_only_headers() {
        let text = [0xaau8; 0x900];
        let segments = [
            Segment {
                vaddr: 0x8001_0000,
                flags: 5,
                data: &text,
            },
            Segment {
                vaddr: 0x8000_0000,
                flags: 4,
                data: b"abiflags",
            },
        ];
        let file = elf32(ET_EXEC, EM_MIPS, 0x8001_0010, &segments);

        let image = Image::load(Cursor::new(file)).unwrap();
        assert_eq!(image.format(), Format::Elf);
        assert_eq!(image.entry(), 0x8001_0010);
        assert_eq!(image.load_address(), 0x8001_0000);
        assert_eq!(image.size(), 0x1000);
        assert!(image.bytes()[..0x900].iter().all(|b| *b == 0xaa));
        assert!(image.bytes()[0x900..].iter().all(|b| *b == 0));
    }

    #[test]
    fn spans_all_loadable_headers() {
        let segments = [
            Segment {
                vaddr: 0x8001_0000,
                flags: 5,
                data: &[1; 0x100],
            },
            Segment {
                vaddr: 0x8001_0800,
                flags: 6,
                data: &[2; 0x40],
            },
        ];
        let file = elf32(ET_EXEC, EM_MIPS, 0x8001_0000, &segments);

        let image = Image::load(Cursor::new(file)).unwrap();
        assert_eq!(image.load_address(), 0x8001_0000);
        assert_eq!(image.size(), 0x1000);
        assert_eq!(image.bytes()[0xff], 1);
        assert_eq!(image.bytes()[0x800], 2);
        assert_eq!(image.bytes()[0x840], 0);
    }

    #[test]
    fn span_beyond_ram() {
        let segments = [
            Segment {
                vaddr: 0x0000_1000,
                flags: 5,
                data: &[1; 4],
            },
            Segment {
                vaddr: 0xfff0_0000,
                flags: 6,
                data: &[2; 4],
            },
        ];
        let file = elf32(ET_EXEC, EM_MIPS, 0x1000, &segments);

        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::OutOfBounds
        ));
    }

    #[test]
    fn rejects_foreign_binaries() {
        let segments = [Segment {
            vaddr: 0x8001_0000,
            flags: 5,
            data: &[0; 16],
        }];

        let file = elf32(ET_EXEC, EM_X86_64, 0, &segments);
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::Unsupported("e_machine")
        ));

        let file = elf32(ET_DYN, EM_MIPS, 0, &segments);
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::Unsupported("e_type")
        ));
    }

    #[test]
    fn only_read_only_headers() {
        let segments = [Segment {
            vaddr: 0x8001_0000,
            flags: 4,
            data: &[0; 16],
        }];

        let file = elf32(ET_EXEC, EM_MIPS, 0, &segments);
        assert!(matches!(
            Image::load(Cursor::new(file)).unwrap_err(),
            Error::NoSegments
        ));
    }
}
