//! Stack reserve and commit from executable headers
//!
//! Fallback source for the maximum stack size when the OS cannot report one.
//! PE images carry `SizeOfStackReserve`/`SizeOfStackCommit` in their optional
//! header; ELF images may carry a stack size in the `PT_GNU_STACK` program
//! header (`p_memsz`). ELF has no notion of commit, so it is reported as 0.

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10B;
const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

/// Offset of `e_lfanew` in the DOS header
const PE_SIGNATURE_OFFSET_OFFSET: u64 = 0x3C;

// Offsets below are relative to the PE signature.
const PE_MAGIC_OFFSET: u64 = 0x18;
const PE_RESERVE_OFFSET: u64 = 0x60; // same for PE32 and PE32+
const PE_COMMIT_OFFSET_32: u64 = 0x64;
const PE_COMMIT_OFFSET_64: u64 = 0x68;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;
const PT_GNU_STACK: u32 = 0x6474_E551;

/// Stack sizes configured in an executable image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutableStack {
    pub reserve: usize,
    pub commit: usize,
}

/// Read the stack reserve and commit of the executable at `path`
///
/// Returns `None` when the file cannot be read, is not a PE/ELF image, or
/// does not configure a stack reserve.
pub fn read_file_stack_reserve_and_commit(path: &Path) -> Option<ExecutableStack> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open executable");
            return None;
        }
    };
    read_stack_reserve_and_commit(&mut BufReader::new(file))
}

/// Read the stack reserve and commit from an executable image
pub fn read_stack_reserve_and_commit<R: Read + Seek>(reader: &mut R) -> Option<ExecutableStack> {
    match read_header(reader) {
        Ok(Some(stack)) if stack.reserve != 0 => Some(stack),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "cannot read executable header");
            None
        }
    }
}

fn read_header<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ExecutableStack>> {
    let mut magic = [0u8; 4];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut magic)?;

    if magic == ELF_MAGIC {
        return read_elf(reader);
    }
    if u16::from_le_bytes([magic[0], magic[1]]) == IMAGE_DOS_SIGNATURE {
        return read_pe(reader);
    }
    Ok(None)
}

fn read_pe<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ExecutableStack>> {
    let mut header = HeaderReader::new(reader, Endian::Little);

    let offset = u64::from(header.u32_at(PE_SIGNATURE_OFFSET_OFFSET)?);
    if header.u32_at(offset)? != IMAGE_NT_SIGNATURE {
        return Ok(None);
    }

    let (reserve, commit) = match header.u16_at(offset + PE_MAGIC_OFFSET)? {
        IMAGE_NT_OPTIONAL_HDR32_MAGIC => (
            u64::from(header.u32_at(offset + PE_RESERVE_OFFSET)?),
            u64::from(header.u32_at(offset + PE_COMMIT_OFFSET_32)?),
        ),
        IMAGE_NT_OPTIONAL_HDR64_MAGIC => (
            header.u64_at(offset + PE_RESERVE_OFFSET)?,
            header.u64_at(offset + PE_COMMIT_OFFSET_64)?,
        ),
        _ => return Ok(None),
    };

    Ok(Some(ExecutableStack {
        reserve: saturating_usize(reserve),
        commit: saturating_usize(commit),
    }))
}

fn read_elf<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ExecutableStack>> {
    let mut ident = [0u8; 2];
    reader.seek(SeekFrom::Start(4))?;
    reader.read_exact(&mut ident)?;

    let endian = match ident[1] {
        ELFDATA2LSB => Endian::Little,
        ELFDATA2MSB => Endian::Big,
        _ => return Ok(None),
    };
    let mut header = HeaderReader::new(reader, endian);

    let class = ident[0];
    let (phoff, phentsize, phnum) = match class {
        ELFCLASS64 => (
            header.u64_at(0x20)?,
            header.u16_at(0x36)?,
            header.u16_at(0x38)?,
        ),
        ELFCLASS32 => (
            u64::from(header.u32_at(0x1C)?),
            header.u16_at(0x2A)?,
            header.u16_at(0x2C)?,
        ),
        _ => return Ok(None),
    };

    for index in 0..u64::from(phnum) {
        let Some(entry) = index
            .checked_mul(u64::from(phentsize))
            .and_then(|delta| phoff.checked_add(delta))
        else {
            return Ok(None);
        };

        if header.u32_at(entry)? != PT_GNU_STACK {
            continue;
        }

        let memsz = if class == ELFCLASS64 {
            header.u64_at(entry + 40)?
        } else {
            u64::from(header.u32_at(entry + 20)?)
        };

        return Ok(Some(ExecutableStack {
            reserve: saturating_usize(memsz),
            commit: 0,
        }));
    }

    Ok(None)
}

fn saturating_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[derive(Debug, Clone, Copy)]
enum Endian {
    Little,
    Big,
}

/// Positioned integer reads in a fixed byte order
struct HeaderReader<'a, R> {
    inner: &'a mut R,
    endian: Endian,
}

impl<'a, R: Read + Seek> HeaderReader<'a, R> {
    fn new(inner: &'a mut R, endian: Endian) -> Self {
        Self { inner, endian }
    }

    fn bytes_at<const N: usize>(&mut self, pos: u64) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.seek(SeekFrom::Start(pos))?;
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn u16_at(&mut self, pos: u64) -> io::Result<u16> {
        let buf = self.bytes_at::<2>(pos)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(buf),
            Endian::Big => u16::from_be_bytes(buf),
        })
    }

    fn u32_at(&mut self, pos: u64) -> io::Result<u32> {
        let buf = self.bytes_at::<4>(pos)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(buf),
            Endian::Big => u32::from_be_bytes(buf),
        })
    }

    fn u64_at(&mut self, pos: u64) -> io::Result<u64> {
        let buf = self.bytes_at::<8>(pos)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(buf),
            Endian::Big => u64::from_be_bytes(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const PE_OFFSET: usize = 0x80;

    fn pe_image(magic: u16, reserve: u64, commit: u64) -> Vec<u8> {
        let mut image = vec![0u8; 0x200];
        image[0..2].copy_from_slice(&IMAGE_DOS_SIGNATURE.to_le_bytes());
        image[0x3C..0x40].copy_from_slice(&(PE_OFFSET as u32).to_le_bytes());
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(&IMAGE_NT_SIGNATURE.to_le_bytes());
        image[PE_OFFSET + 0x18..PE_OFFSET + 0x1A].copy_from_slice(&magic.to_le_bytes());

        let reserve_at = PE_OFFSET + 0x60;
        if magic == IMAGE_NT_OPTIONAL_HDR32_MAGIC {
            image[reserve_at..reserve_at + 4].copy_from_slice(&(reserve as u32).to_le_bytes());
            image[PE_OFFSET + 0x64..PE_OFFSET + 0x68]
                .copy_from_slice(&(commit as u32).to_le_bytes());
        } else {
            image[reserve_at..reserve_at + 8].copy_from_slice(&reserve.to_le_bytes());
            image[PE_OFFSET + 0x68..PE_OFFSET + 0x70].copy_from_slice(&commit.to_le_bytes());
        }
        image
    }

    fn elf64_le_image(stack_size: u64) -> Vec<u8> {
        let mut image = vec![0u8; 0x200];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS64;
        image[5] = ELFDATA2LSB;
        image[0x20..0x28].copy_from_slice(&0x40u64.to_le_bytes());
        image[0x36..0x38].copy_from_slice(&56u16.to_le_bytes());
        image[0x38..0x3A].copy_from_slice(&2u16.to_le_bytes());
        // First entry is PT_LOAD, second is PT_GNU_STACK.
        image[0x40..0x44].copy_from_slice(&1u32.to_le_bytes());
        image[0x78..0x7C].copy_from_slice(&PT_GNU_STACK.to_le_bytes());
        image[0xA0..0xA8].copy_from_slice(&stack_size.to_le_bytes());
        image
    }

    fn elf32_be_image(stack_size: u32) -> Vec<u8> {
        let mut image = vec![0u8; 0x100];
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS32;
        image[5] = ELFDATA2MSB;
        image[0x1C..0x20].copy_from_slice(&0x34u32.to_be_bytes());
        image[0x2A..0x2C].copy_from_slice(&32u16.to_be_bytes());
        image[0x2C..0x2E].copy_from_slice(&1u16.to_be_bytes());
        image[0x34..0x38].copy_from_slice(&PT_GNU_STACK.to_be_bytes());
        image[0x48..0x4C].copy_from_slice(&stack_size.to_be_bytes());
        image
    }

    fn read(image: Vec<u8>) -> Option<ExecutableStack> {
        read_stack_reserve_and_commit(&mut Cursor::new(image))
    }

    #[test]
    fn test_pe32_reserve_and_commit() {
        let stack = read(pe_image(IMAGE_NT_OPTIONAL_HDR32_MAGIC, 0x10_0000, 0x1000));
        assert_eq!(
            stack,
            Some(ExecutableStack {
                reserve: 0x10_0000,
                commit: 0x1000
            })
        );
    }

    #[test]
    fn test_pe32_plus_reserve_and_commit() {
        let stack = read(pe_image(IMAGE_NT_OPTIONAL_HDR64_MAGIC, 0x100_0000, 0x2000));
        assert_eq!(
            stack,
            Some(ExecutableStack {
                reserve: 0x100_0000,
                commit: 0x2000
            })
        );
    }

    #[test]
    fn test_pe_unknown_optional_magic() {
        assert_eq!(read(pe_image(0x107, 0x10_0000, 0x1000)), None);
    }

    #[test]
    fn test_pe_bad_nt_signature() {
        let mut image = pe_image(IMAGE_NT_OPTIONAL_HDR64_MAGIC, 0x10_0000, 0x1000);
        image[PE_OFFSET] = b'X';
        assert_eq!(read(image), None);
    }

    #[test]
    fn test_pe_zero_reserve_is_unavailable() {
        assert_eq!(read(pe_image(IMAGE_NT_OPTIONAL_HDR64_MAGIC, 0, 0x1000)), None);
    }

    #[test]
    fn test_elf64_gnu_stack() {
        let stack = read(elf64_le_image(8 * 1024 * 1024));
        assert_eq!(
            stack,
            Some(ExecutableStack {
                reserve: 8 * 1024 * 1024,
                commit: 0
            })
        );
    }

    #[test]
    fn test_elf32_big_endian_gnu_stack() {
        let stack = read(elf32_be_image(0x20_0000));
        assert_eq!(
            stack,
            Some(ExecutableStack {
                reserve: 0x20_0000,
                commit: 0
            })
        );
    }

    #[test]
    fn test_elf_without_stack_size() {
        assert_eq!(read(elf64_le_image(0)), None);
    }

    #[test]
    fn test_unrecognized_and_truncated_input() {
        assert_eq!(read(b"#!/bin/sh\n".to_vec()), None);
        assert_eq!(read(vec![0x4D]), None);
        assert_eq!(read(ELF_MAGIC.to_vec()), None);
    }

    #[test]
    fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.exe");
        std::fs::write(&path, pe_image(IMAGE_NT_OPTIONAL_HDR64_MAGIC, 0x40_0000, 0x1000)).unwrap();

        let stack = read_file_stack_reserve_and_commit(&path).unwrap();
        assert_eq!(stack.reserve, 0x40_0000);
        assert_eq!(stack.commit, 0x1000);

        assert_eq!(
            read_file_stack_reserve_and_commit(&dir.path().join("missing.exe")),
            None
        );
    }
}
