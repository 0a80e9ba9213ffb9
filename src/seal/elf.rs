//! Just enough ELF to answer two questions about an executable: its word size,
//! and which shared objects its dynamic section asks for (`DT_NEEDED`).
//!
//! The dynamic array is located through the `PT_DYNAMIC` program header, and
//! the string table address from `DT_STRTAB` is mapped back to a file offset
//! through the `PT_LOAD` segments. Both byte orders are handled.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFDATA2MSB: u8 = 2;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;

/// Upper bound on the dynamic array we are willing to read.
const MAX_DYNAMIC_BYTES: u64 = 1 << 20;
/// Upper bound on a single library name.
const MAX_NAME_BYTES: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ElfError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an ELF file")]
    BadMagic,

    #[error("malformed ELF: {0}")]
    Malformed(&'static str),
}

/// ELF word size from `e_ident[EI_CLASS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
    /// ELFCLASSNONE or an unknown value.
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfInfo {
    pub class: ElfClass,
    /// `DT_NEEDED` entries in file order. Empty for static executables.
    pub needed: Vec<String>,
}

#[derive(Clone, Copy)]
struct Reader<'a> {
    file: &'a File,
    big_endian: bool,
    wide: bool,
}

impl Reader<'_> {
    fn bytes<const N: usize>(&self, offset: u64) -> Result<[u8; N], ElfError> {
        let mut buf = [0u8; N];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn u16(&self, offset: u64) -> Result<u16, ElfError> {
        let b = self.bytes::<2>(offset)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u32(&self, offset: u64) -> Result<u32, ElfError> {
        let b = self.bytes::<4>(offset)?;
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    fn u64(&self, offset: u64) -> Result<u64, ElfError> {
        let b = self.bytes::<8>(offset)?;
        Ok(if self.big_endian {
            u64::from_be_bytes(b)
        } else {
            u64::from_le_bytes(b)
        })
    }

    /// Native word: 4 bytes for ELF32, 8 for ELF64.
    fn word(&self, offset: u64) -> Result<u64, ElfError> {
        if self.wide {
            self.u64(offset)
        } else {
            self.u32(offset).map(u64::from)
        }
    }

    fn c_string(&self, offset: u64) -> Result<String, ElfError> {
        let mut name = Vec::new();
        let mut chunk = [0u8; 64];
        while name.len() < MAX_NAME_BYTES {
            let read = self
                .file
                .read_at(&mut chunk, offset_at(offset, name.len() as u64)?)?;
            if read == 0 {
                return Err(ElfError::Malformed("unterminated string"));
            }
            if let Some(end) = chunk[..read].iter().position(|&b| b == 0) {
                name.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&name).into_owned());
            }
            name.extend_from_slice(&chunk[..read]);
        }
        Err(ElfError::Malformed("string too long"))
    }
}

/// `base + delta`, rejecting offsets that do not fit in a u64.
fn offset_at(base: u64, delta: u64) -> Result<u64, ElfError> {
    base.checked_add(delta)
        .ok_or(ElfError::Malformed("offset out of range"))
}

struct Segment {
    kind: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
}

/// Read the class and `DT_NEEDED` list of the ELF file at `path`.
pub fn read_elf(path: &Path) -> Result<ElfInfo, ElfError> {
    let file = File::open(path)?;

    let mut ident = [0u8; 16];
    file.read_exact_at(&mut ident, 0)?;
    if ident[..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }

    let class = match ident[EI_CLASS] {
        1 => ElfClass::Elf32,
        2 => ElfClass::Elf64,
        other => ElfClass::Unknown(other),
    };
    let wide = match class {
        ElfClass::Elf32 => false,
        ElfClass::Elf64 => true,
        ElfClass::Unknown(_) => return Err(ElfError::Malformed("unknown ELF class")),
    };
    let r = Reader {
        file: &file,
        big_endian: ident[EI_DATA] == ELFDATA2MSB,
        wide,
    };

    let segments = program_headers(&r)?;
    let Some(dynamic) = segments.iter().find(|s| s.kind == PT_DYNAMIC) else {
        // No dynamic segment at all: fully static executable.
        return Ok(ElfInfo {
            class,
            needed: Vec::new(),
        });
    };

    let entry_size: u64 = if wide { 16 } else { 8 };
    let count = dynamic.filesz.min(MAX_DYNAMIC_BYTES) / entry_size;

    let mut needed_offsets = Vec::new();
    let mut strtab_vaddr = None;
    for i in 0..count {
        let at = offset_at(dynamic.offset, i * entry_size)?;
        let tag = r.word(at)?;
        let val = r.word(offset_at(at, entry_size / 2)?)?;
        match tag {
            DT_NULL => break,
            DT_NEEDED => needed_offsets.push(val),
            DT_STRTAB => strtab_vaddr = Some(val),
            _ => {}
        }
    }

    if needed_offsets.is_empty() {
        return Ok(ElfInfo {
            class,
            needed: Vec::new(),
        });
    }

    let strtab_vaddr = strtab_vaddr.ok_or(ElfError::Malformed("DT_NEEDED without DT_STRTAB"))?;
    let strtab = vaddr_to_offset(&segments, strtab_vaddr)
        .ok_or(ElfError::Malformed("DT_STRTAB outside of loadable segments"))?;

    let needed = needed_offsets
        .into_iter()
        .map(|off| r.c_string(offset_at(strtab, off)?))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ElfInfo { class, needed })
}

fn program_headers(r: &Reader<'_>) -> Result<Vec<Segment>, ElfError> {
    // e_phoff / e_phentsize / e_phnum offsets differ between ELF32 and ELF64.
    let (phoff, phentsize, phnum) = if r.wide {
        (r.u64(0x20)?, r.u16(0x36)?, r.u16(0x38)?)
    } else {
        (u64::from(r.u32(0x1c)?), r.u16(0x2a)?, r.u16(0x2c)?)
    };

    let min_entry = if r.wide { 56 } else { 32 };
    if phnum > 0 && phentsize < min_entry {
        return Err(ElfError::Malformed("program header entries too small"));
    }

    let mut segments = Vec::with_capacity(usize::from(phnum));
    for i in 0..u64::from(phnum) {
        let at = offset_at(phoff, i * u64::from(phentsize))?;
        let kind = r.u32(at)?;
        let segment = if r.wide {
            Segment {
                kind,
                offset: r.u64(offset_at(at, 8)?)?,
                vaddr: r.u64(offset_at(at, 16)?)?,
                filesz: r.u64(offset_at(at, 32)?)?,
            }
        } else {
            Segment {
                kind,
                offset: u64::from(r.u32(offset_at(at, 4)?)?),
                vaddr: u64::from(r.u32(offset_at(at, 8)?)?),
                filesz: u64::from(r.u32(offset_at(at, 16)?)?),
            }
        };
        segments.push(segment);
    }
    Ok(segments)
}

fn vaddr_to_offset(segments: &[Segment], vaddr: u64) -> Option<u64> {
    segments
        .iter()
        .filter(|s| s.kind == PT_LOAD)
        .find(|s| vaddr >= s.vaddr && vaddr - s.vaddr < s.filesz)
        .and_then(|s| (vaddr - s.vaddr).checked_add(s.offset))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a little-endian ELF64 image with one PT_LOAD covering the file
    /// and, when `needed` is non-empty, a PT_DYNAMIC listing those names.
    pub(crate) fn elf64_image(needed: &[&str]) -> Vec<u8> {
        const EHDR: usize = 64;
        const PHDR: usize = 56;
        let phnum = if needed.is_empty() { 1 } else { 2 };
        let phoff = EHDR;
        let strtab_off = phoff + PHDR * phnum;

        let mut strtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for name in needed {
            name_offsets.push(strtab.len() as u64);
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
        }
        let dyn_off = (strtab_off + strtab.len()).next_multiple_of(8);

        let mut dynamic = Vec::new();
        for off in &name_offsets {
            dynamic.extend_from_slice(&DT_NEEDED.to_le_bytes());
            dynamic.extend_from_slice(&off.to_le_bytes());
        }
        dynamic.extend_from_slice(&DT_STRTAB.to_le_bytes());
        dynamic.extend_from_slice(&(strtab_off as u64).to_le_bytes());
        dynamic.extend_from_slice(&[0u8; 16]);

        let total = dyn_off + dynamic.len();
        let mut image = vec![0u8; total];
        image[..4].copy_from_slice(&ELF_MAGIC);
        image[EI_CLASS] = 2;
        image[EI_DATA] = 1;
        image[0x20..0x28].copy_from_slice(&(phoff as u64).to_le_bytes());
        image[0x36..0x38].copy_from_slice(&(PHDR as u16).to_le_bytes());
        image[0x38..0x3a].copy_from_slice(&(phnum as u16).to_le_bytes());

        let mut write_phdr = |index: usize, kind: u32, offset: u64, filesz: u64| {
            let at = phoff + index * PHDR;
            image[at..at + 4].copy_from_slice(&kind.to_le_bytes());
            image[at + 8..at + 16].copy_from_slice(&offset.to_le_bytes());
            // vaddr == offset: identity mapping
            image[at + 16..at + 24].copy_from_slice(&offset.to_le_bytes());
            image[at + 32..at + 40].copy_from_slice(&filesz.to_le_bytes());
        };
        write_phdr(0, PT_LOAD, 0, total as u64);
        if !needed.is_empty() {
            write_phdr(1, PT_DYNAMIC, dyn_off as u64, dynamic.len() as u64);
        }

        image[strtab_off..strtab_off + strtab.len()].copy_from_slice(&strtab);
        image[dyn_off..].copy_from_slice(&dynamic);
        image
    }

    #[test]
    fn test_reads_needed_libraries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dynamic");
        std::fs::write(&path, elf64_image(&["libc.so.6", "libacl.so.1"])).unwrap();

        let info = read_elf(&path).unwrap();
        assert_eq!(info.class, ElfClass::Elf64);
        assert_eq!(info.needed, vec!["libc.so.6", "libacl.so.1"]);
    }

    #[test]
    fn test_static_binary_has_no_needed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("static");
        std::fs::write(&path, elf64_image(&[])).unwrap();

        let info = read_elf(&path).unwrap();
        assert!(info.needed.is_empty());
    }

    #[test]
    fn test_rejects_non_elf() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("text");
        std::fs::write(&path, b"just some text, long enough for an ident").unwrap();

        assert!(matches!(read_elf(&path), Err(ElfError::BadMagic)));
    }

    #[test]
    fn test_truncated_header_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("truncated");
        std::fs::write(&path, &ELF_MAGIC).unwrap();

        assert!(read_elf(&path).is_err());
    }

    #[test]
    fn test_offsets_past_u64_are_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        let image = elf64_image(&["libc.so.6"]);
        // Second program header (PT_DYNAMIC) starts at 64 + 56
        let dyn_off = u64::from_le_bytes(image[128..136].try_into().unwrap()) as usize;

        // DT_NEEDED string offset wraps around the string table address
        let mut needed = image.clone();
        needed[dyn_off + 8..dyn_off + 16].copy_from_slice(&u64::MAX.to_le_bytes());
        let path = tmp.path().join("needed");
        std::fs::write(&path, &needed).unwrap();
        assert!(matches!(read_elf(&path), Err(ElfError::Malformed(_))));

        // PT_LOAD file offset that cannot be added to
        let mut load = image;
        load[72..80].copy_from_slice(&u64::MAX.to_le_bytes());
        let path = tmp.path().join("load");
        std::fs::write(&path, &load).unwrap();
        assert!(matches!(read_elf(&path), Err(ElfError::Malformed(_))));
    }

    #[test]
    fn test_current_executable_parses() {
        let exe = std::env::current_exe().unwrap();
        let info = read_elf(&exe).unwrap();
        assert_ne!(info.class, ElfClass::Unknown(0));
    }
}
