// SPDX-License-Identifier: Apache-2.0

use super::{remaining, Error, Exec, Format, Image, SECTOR};

use std::io::{Read, Seek};

use log::debug;

pub const MAGIC: &[u8; 8] = b"PS-X EXE";

const EXEC_OFFSET: usize = 16;
const LICENSE_OFFSET: usize = EXEC_OFFSET + Exec::SIZE;
const LICENSE_SIZE: usize = 64;

/// Native executables: a 2048 byte header followed by exactly `t_size`
/// bytes of text.
pub fn load(mut reader: impl Read + Seek) -> Result<Image, Error> {
    let mut header = [0u8; SECTOR];
    reader.read_exact(&mut header)?;

    if &header[..MAGIC.len()] != MAGIC {
        return Err(Error::UnknownFormat);
    }

    let mut exec = [0u8; Exec::SIZE];
    exec.copy_from_slice(&header[EXEC_OFFSET..LICENSE_OFFSET]);
    let params = Exec::decode(&exec);

    let license = &header[LICENSE_OFFSET..][..LICENSE_SIZE];
    let license = license.split(|b| *b == 0).next().unwrap_or_default();
    debug!("PS-EXE marker: {:?}", String::from_utf8_lossy(license));

    if remaining(&mut reader)? < u64::from(params.t_size) {
        return Err(Error::Truncated);
    }

    let mut bytes = vec![0u8; params.t_size as usize];
    reader.read_exact(&mut bytes)?;

    Ok(Image::new(Format::PsExe, params, bytes))
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use super::*;

    use std::io::Cursor;

    fn psexe(params: &Exec, text: &[u8]) -> Vec<u8> {
        let mut file = vec![0u8; SECTOR];
        file[..8].copy_from_slice(MAGIC);
        file[EXEC_OFFSET..LICENSE_OFFSET].copy_from_slice(&params.encode());
        file[LICENSE_OFFSET..][..11].copy_from_slice(b"Test Marker");
        file.extend_from_slice(text);
        file
    }

    #[test]
    fn native() {
        let params = Exec {
            pc0: 0x8001_0040,
            gp0: 0x8002_0000,
            t_addr: 0x8001_0000,
            t_size: SECTOR as u32,
            sp_addr: 0x801f_fff0,
            ..Default::default()
        };
        let text: Vec<u8> = (0..SECTOR).map(|i| i as u8).collect();

        let image = Image::load(Cursor::new(psexe(&params, &text))).unwrap();
        assert_eq!(image.format(), Format::PsExe);
        assert_eq!(image.params(), &params);
        assert_eq!(image.entry(), 0x8001_0040);
        assert_eq!(image.load_address(), 0x8001_0000);
        assert_eq!(image.size(), SECTOR as u32);
        assert_eq!(image.bytes(), &text[..]);
    }

    #[test]
    fn trailing_data_is_ignored() {
        let params = Exec {
            t_size: 4,
            ..Default::default()
        };

        let image = Image::load(Cursor::new(psexe(&params, b"abcdefgh"))).unwrap();
        assert_eq!(image.bytes(), b"abcd");
    }

    #[test]
    fn short_text() {
        let params = Exec {
            t_size: SECTOR as u32,
            ..Default::default()
        };

        let err = Image::load(Cursor::new(psexe(&params, &[0; 100]))).unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }

    #[test]
    fn huge_declared_text() {
        let params = Exec {
            t_size: u32::MAX,
            ..Default::default()
        };

        let err = Image::load(Cursor::new(psexe(&params, b"abcd"))).unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }

    #[test]
    fn short_header() {
        let err = Image::load(Cursor::new(b"PS-X EXE and nothing else".to_vec())).unwrap_err();
        assert!(matches!(err, Error::Truncated));
    }
}
