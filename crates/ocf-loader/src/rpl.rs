//! RPL file format
//!
//! RPL is a 32-bit big-endian ELF variant with Cafe-specific section
//! types for exports, imports, per-section CRCs and a file info block.
//! Sections may be individually deflate-compressed.

use flate2::read::DeflateDecoder;
use ocf_core::error::LoaderError;
use std::io::Read;
use tracing::{debug, error};

/// ELF magic bytes
pub const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2MSB: u8 = 2;
pub const EV_CURRENT: u8 = 1;

/// ident[7..9] for Cafe binaries
pub const EABI_CAFE: [u8; 2] = [0xCA, 0xFE];

/// e_type for an RPL
pub const ET_CAFE_RPL: u16 = 0xFE01;
pub const EM_PPC: u16 = 20;

pub const HEADER_SIZE: u16 = 0x34;
pub const SECTION_HEADER_SIZE: u16 = 0x28;
pub const SYMBOL_SIZE: u32 = 16;
pub const RELA_SIZE: u32 = 12;
pub const FILE_INFO_SIZE: u32 = 0x60;
pub const FILE_INFO_VERSION: u32 = 0xCAFE_0402;

/// Section header types
pub mod sht {
    pub const NULL: u32 = 0;
    pub const PROGBITS: u32 = 1;
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
    pub const RELA: u32 = 4;
    pub const NOBITS: u32 = 8;
    pub const RPL_EXPORTS: u32 = 0x8000_0001;
    pub const RPL_IMPORTS: u32 = 0x8000_0002;
    pub const RPL_CRCS: u32 = 0x8000_0003;
    pub const RPL_FILEINFO: u32 = 0x8000_0004;
}

/// Section header flags
pub mod shf {
    pub const WRITE: u32 = 1;
    pub const ALLOC: u32 = 2;
    pub const EXECINSTR: u32 = 4;
    pub const TLS: u32 = 0x0400_0000;
    pub const DEFLATED: u32 = 0x0800_0000;
}

/// Special section indices
pub mod shn {
    pub const UNDEF: u16 = 0;
    pub const LORESERVE: u16 = 0xFF00;
    pub const ABS: u16 = 0xFFF1;
}

/// PowerPC relocation types
pub mod r_ppc {
    pub const NONE: u32 = 0;
    pub const ADDR32: u32 = 1;
    pub const ADDR16_LO: u32 = 4;
    pub const ADDR16_HI: u32 = 5;
    pub const ADDR16_HA: u32 = 6;
    pub const REL24: u32 = 10;
    pub const DTPMOD32: u32 = 68;
    pub const DTPREL32: u32 = 78;
    pub const EMB_SDA21: u32 = 109;
}

/// Symbol binding
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol type
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;
pub const STT_TLS: u8 = 6;

fn read_u16(data: &[u8], offset: usize) -> Result<u16, LoaderError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| LoaderError::Format(format!("read past end of file at 0x{:x}", offset)))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, LoaderError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| LoaderError::Format(format!("read past end of file at 0x{:x}", offset)))
}

/// RPL file header
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub entry: u32,
    pub shoff: u32,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl Header {
    /// Parse and validate the file header
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < HEADER_SIZE as usize {
            return Err(LoaderError::Format(format!(
                "file too small for header: {} bytes",
                data.len()
            )));
        }

        if data[0..4] != MAGIC {
            return Err(LoaderError::Format(format!(
                "bad magic {:02X} {:02X} {:02X} {:02X}",
                data[0], data[1], data[2], data[3]
            )));
        }

        if data[4] != ELFCLASS32 {
            return Err(LoaderError::Format(format!("not 32-bit, class={}", data[4])));
        }

        if data[5] != ELFDATA2MSB {
            return Err(LoaderError::Format(format!(
                "not big-endian, encoding={}",
                data[5]
            )));
        }

        if data[7..9] != EABI_CAFE {
            return Err(LoaderError::Format(format!(
                "not a Cafe binary, abi={:02X}{:02X}",
                data[7], data[8]
            )));
        }

        let e_type = read_u16(data, 0x10)?;
        if e_type != ET_CAFE_RPL {
            return Err(LoaderError::Format(format!("not an RPL, type=0x{:04X}", e_type)));
        }

        let machine = read_u16(data, 0x12)?;
        if machine != EM_PPC {
            return Err(LoaderError::Format(format!("not PowerPC, machine={}", machine)));
        }

        let version = read_u32(data, 0x14)?;
        if version != 1 {
            return Err(LoaderError::Format(format!("bad ELF version {}", version)));
        }

        Ok(Self {
            entry: read_u32(data, 0x18)?,
            shoff: read_u32(data, 0x20)?,
            shentsize: read_u16(data, 0x2E)?,
            shnum: read_u16(data, 0x30)?,
            shstrndx: read_u16(data, 0x32)?,
        })
    }

    /// Serialize a complete 0x34-byte header
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push(ELFCLASS32);
        out.push(ELFDATA2MSB);
        out.push(EV_CURRENT);
        out.extend_from_slice(&EABI_CAFE);
        out.extend_from_slice(&[0u8; 7]);
        out.extend_from_slice(&ET_CAFE_RPL.to_be_bytes());
        out.extend_from_slice(&EM_PPC.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&self.entry.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // phoff
        out.extend_from_slice(&self.shoff.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // flags
        out.extend_from_slice(&HEADER_SIZE.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // phentsize
        out.extend_from_slice(&0u16.to_be_bytes()); // phnum
        out.extend_from_slice(&self.shentsize.to_be_bytes());
        out.extend_from_slice(&self.shnum.to_be_bytes());
        out.extend_from_slice(&self.shstrndx.to_be_bytes());
    }
}

/// Section header
#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u32,
    pub addr: u32,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addralign: u32,
    pub entsize: u32,
}

impl SectionHeader {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, LoaderError> {
        Ok(Self {
            name: read_u32(data, offset)?,
            sh_type: read_u32(data, offset + 0x04)?,
            flags: read_u32(data, offset + 0x08)?,
            addr: read_u32(data, offset + 0x0C)?,
            offset: read_u32(data, offset + 0x10)?,
            size: read_u32(data, offset + 0x14)?,
            link: read_u32(data, offset + 0x18)?,
            info: read_u32(data, offset + 0x1C)?,
            addralign: read_u32(data, offset + 0x20)?,
            entsize: read_u32(data, offset + 0x24)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name.to_be_bytes());
        out.extend_from_slice(&self.sh_type.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.link.to_be_bytes());
        out.extend_from_slice(&self.info.to_be_bytes());
        out.extend_from_slice(&self.addralign.to_be_bytes());
        out.extend_from_slice(&self.entsize.to_be_bytes());
    }

    pub fn is_alloc(&self) -> bool {
        self.flags & shf::ALLOC != 0
    }

    pub fn is_tls(&self) -> bool {
        self.flags & shf::TLS != 0
    }
}

/// Symbol table entry
#[derive(Debug, Clone, Default)]
pub struct Symbol {
    pub name: u32,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl Symbol {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, LoaderError> {
        Ok(Self {
            name: read_u32(data, offset)?,
            value: read_u32(data, offset + 4)?,
            size: read_u32(data, offset + 8)?,
            info: *data
                .get(offset + 12)
                .ok_or_else(|| LoaderError::Format("truncated symbol".to_string()))?,
            other: *data
                .get(offset + 13)
                .ok_or_else(|| LoaderError::Format("truncated symbol".to_string()))?,
            shndx: read_u16(data, offset + 14)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name.to_be_bytes());
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.push(self.info);
        out.push(self.other);
        out.extend_from_slice(&self.shndx.to_be_bytes());
    }

    pub fn binding(&self) -> u8 {
        self.info >> 4
    }

    pub fn sym_type(&self) -> u8 {
        self.info & 0xF
    }
}

/// Relocation entry with addend
#[derive(Debug, Clone, Default)]
pub struct Rela {
    pub offset: u32,
    pub info: u32,
    pub addend: i32,
}

impl Rela {
    pub fn parse(data: &[u8], offset: usize) -> Result<Self, LoaderError> {
        Ok(Self {
            offset: read_u32(data, offset)?,
            info: read_u32(data, offset + 4)?,
            addend: read_u32(data, offset + 8)? as i32,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.info.to_be_bytes());
        out.extend_from_slice(&(self.addend as u32).to_be_bytes());
    }

    pub fn r_type(&self) -> u32 {
        self.info & 0xFF
    }

    pub fn r_sym(&self) -> u32 {
        self.info >> 8
    }
}

/// Parsed SHT_RPL_FILEINFO contents
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub version: u32,
    pub text_size: u32,
    pub text_align: u32,
    pub data_size: u32,
    pub data_align: u32,
    pub load_size: u32,
    pub load_align: u32,
    pub temp_size: u32,
    pub tramp_adjust: u32,
    pub sda_base: u32,
    pub sda2_base: u32,
    pub stack_size: u32,
    pub filename: u32,
    pub flags: u32,
    pub heap_size: u32,
    pub tag_offset: u32,
    pub min_version: u32,
    pub compression_level: i32,
    pub tramp_addition: u32,
    pub file_info_pad: u32,
    pub cafe_sdk_version: u32,
    pub cafe_sdk_revision: u32,
    pub tls_module_index: i16,
    pub tls_align_shift: u16,
    pub runtime_file_info_size: u32,
}

impl FileInfo {
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        if data.len() < FILE_INFO_SIZE as usize {
            return Err(LoaderError::Format(format!(
                "file info too small: {} bytes",
                data.len()
            )));
        }

        Ok(Self {
            version: read_u32(data, 0x00)?,
            text_size: read_u32(data, 0x04)?,
            text_align: read_u32(data, 0x08)?,
            data_size: read_u32(data, 0x0C)?,
            data_align: read_u32(data, 0x10)?,
            load_size: read_u32(data, 0x14)?,
            load_align: read_u32(data, 0x18)?,
            temp_size: read_u32(data, 0x1C)?,
            tramp_adjust: read_u32(data, 0x20)?,
            sda_base: read_u32(data, 0x24)?,
            sda2_base: read_u32(data, 0x28)?,
            stack_size: read_u32(data, 0x2C)?,
            filename: read_u32(data, 0x30)?,
            flags: read_u32(data, 0x34)?,
            heap_size: read_u32(data, 0x38)?,
            tag_offset: read_u32(data, 0x3C)?,
            min_version: read_u32(data, 0x40)?,
            compression_level: read_u32(data, 0x44)? as i32,
            tramp_addition: read_u32(data, 0x48)?,
            file_info_pad: read_u32(data, 0x4C)?,
            cafe_sdk_version: read_u32(data, 0x50)?,
            cafe_sdk_revision: read_u32(data, 0x54)?,
            tls_module_index: read_u16(data, 0x58)? as i16,
            tls_align_shift: read_u16(data, 0x5A)?,
            runtime_file_info_size: read_u32(data, 0x5C)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.text_size.to_be_bytes());
        out.extend_from_slice(&self.text_align.to_be_bytes());
        out.extend_from_slice(&self.data_size.to_be_bytes());
        out.extend_from_slice(&self.data_align.to_be_bytes());
        out.extend_from_slice(&self.load_size.to_be_bytes());
        out.extend_from_slice(&self.load_align.to_be_bytes());
        out.extend_from_slice(&self.temp_size.to_be_bytes());
        out.extend_from_slice(&self.tramp_adjust.to_be_bytes());
        out.extend_from_slice(&self.sda_base.to_be_bytes());
        out.extend_from_slice(&self.sda2_base.to_be_bytes());
        out.extend_from_slice(&self.stack_size.to_be_bytes());
        out.extend_from_slice(&self.filename.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&self.heap_size.to_be_bytes());
        out.extend_from_slice(&self.tag_offset.to_be_bytes());
        out.extend_from_slice(&self.min_version.to_be_bytes());
        out.extend_from_slice(&(self.compression_level as u32).to_be_bytes());
        out.extend_from_slice(&self.tramp_addition.to_be_bytes());
        out.extend_from_slice(&self.file_info_pad.to_be_bytes());
        out.extend_from_slice(&self.cafe_sdk_version.to_be_bytes());
        out.extend_from_slice(&self.cafe_sdk_revision.to_be_bytes());
        out.extend_from_slice(&(self.tls_module_index as u16).to_be_bytes());
        out.extend_from_slice(&self.tls_align_shift.to_be_bytes());
        out.extend_from_slice(&self.runtime_file_info_size.to_be_bytes());
    }
}

/// A section with its (inflated) file data
#[derive(Debug, Clone)]
pub struct RplSection {
    pub header: SectionHeader,
    pub data: Vec<u8>,
}

/// A fully parsed RPL image
#[derive(Debug, Clone)]
pub struct RplImage {
    pub header: Header,
    pub sections: Vec<RplSection>,
}

impl RplImage {
    /// Parse an RPL from file bytes
    ///
    /// Section data is inflated up front. A section that fails to
    /// inflate gets empty data, which downgrades its symbols rather
    /// than failing the whole load.
    pub fn parse(data: &[u8]) -> Result<Self, LoaderError> {
        let header = Header::parse(data)?;

        if header.shentsize != 0 && header.shentsize != SECTION_HEADER_SIZE {
            return Err(LoaderError::Format(format!(
                "bad section header entry size {}",
                header.shentsize
            )));
        }

        let mut sections = Vec::with_capacity(header.shnum as usize);
        for i in 0..header.shnum {
            let offset = header.shoff as usize + i as usize * SECTION_HEADER_SIZE as usize;
            let sh = SectionHeader::parse(data, offset)?;
            let section_data = Self::read_section_data(data, &sh, i)?;
            sections.push(RplSection {
                header: sh,
                data: section_data,
            });
        }

        debug!(
            entry = format_args!("0x{:08x}", header.entry),
            sections = sections.len(),
            "parsed RPL"
        );

        Ok(Self { header, sections })
    }

    fn read_section_data(
        data: &[u8],
        sh: &SectionHeader,
        index: u16,
    ) -> Result<Vec<u8>, LoaderError> {
        if sh.sh_type == sht::NULL || sh.sh_type == sht::NOBITS || sh.offset == 0 || sh.size == 0 {
            return Ok(Vec::new());
        }

        let start = sh.offset as usize;
        let end = start + sh.size as usize;
        let raw = data.get(start..end).ok_or_else(|| {
            LoaderError::Format(format!(
                "section {} data out of bounds (0x{:x}..0x{:x})",
                index, start, end
            ))
        })?;

        if sh.flags & shf::DEFLATED == 0 {
            return Ok(raw.to_vec());
        }

        if raw.len() < 4 {
            error!(section = index, "deflated section too small, treating as empty");
            return Ok(Vec::new());
        }

        let inflated_size = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let mut inflated = Vec::with_capacity(inflated_size);
        match DeflateDecoder::new(&raw[4..]).read_to_end(&mut inflated) {
            Ok(_) if inflated.len() == inflated_size => Ok(inflated),
            Ok(n) => {
                error!(
                    section = index,
                    expected = inflated_size,
                    got = n,
                    "inflated section has wrong size, treating as empty"
                );
                Ok(Vec::new())
            }
            Err(err) => {
                error!(section = index, %err, "failed to inflate section, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Name of a section from the shstrtab
    pub fn section_name(&self, index: usize) -> &str {
        let Some(strtab) = self.sections.get(self.header.shstrndx as usize) else {
            return "";
        };
        let Some(section) = self.sections.get(index) else {
            return "";
        };
        string_at(&strtab.data, section.header.name)
    }

    /// The parsed file info section, required in every valid RPL
    pub fn file_info(&self) -> Result<FileInfo, LoaderError> {
        self.sections
            .iter()
            .find(|s| s.header.sh_type == sht::RPL_FILEINFO)
            .ok_or_else(|| LoaderError::Format("missing SHT_RPL_FILEINFO section".to_string()))
            .and_then(|s| FileInfo::parse(&s.data))
    }
}

/// NUL-terminated string at `offset` in a string table
pub fn string_at(table: &[u8], offset: u32) -> &str {
    let start = offset as usize;
    if start >= table.len() {
        return "";
    }
    let end = table[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .unwrap_or(table.len());
    std::str::from_utf8(&table[start..end]).unwrap_or("")
}
