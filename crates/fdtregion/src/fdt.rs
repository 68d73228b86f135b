//! Read-only access to a flattened devicetree blob.
//!
//! [`Fdt`] validates the header once at construction and then hands out
//! slices of the three sections (memory-reserve map, structure block,
//! string block). All multi-byte fields in the format are big-endian.

use zerocopy::byteorder::big_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::Error;

pub(crate) const FDT_MAGIC: u32 = 0xd00d_feed;

/// Lowest header version this crate accepts.
pub(crate) const FIRST_SUPPORTED_VERSION: u32 = 16;
/// Header version written when reassembling a blob.
pub(crate) const LAST_SUPPORTED_VERSION: u32 = 17;

/// The fixed 40-byte blob header.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub(crate) struct Header {
    pub magic: U32,
    pub totalsize: U32,
    pub off_dt_struct: U32,
    pub off_dt_strings: U32,
    pub off_mem_rsvmap: U32,
    pub version: U32,
    pub last_comp_version: U32,
    pub boot_cpuid_phys: U32,
    pub size_dt_strings: U32,
    pub size_dt_struct: U32,
}

/// One memory-reserve map record.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub(crate) struct ReserveEntry {
    pub address: U64,
    pub size: U64,
}

fn section(raw: &[u8], start: usize, len: usize, what: &'static str) -> Result<(), Error> {
    let end = start.checked_add(len).ok_or(Error::BadBlob(what))?;
    if end > raw.len() {
        return Err(Error::BadBlob(what));
    }
    Ok(())
}

/// A validated view over the bytes of a flattened devicetree.
///
/// Construction checks the header and section layout; it does not walk the
/// structure block, so a blob with a corrupt tag stream is only rejected
/// once the walk reaches the damage.
#[derive(Clone, Copy)]
pub struct Fdt<'a> {
    raw: &'a [u8],
    header: Header,
}

impl<'a> Fdt<'a> {
    /// Validates `raw` as a devicetree blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadBlob`] when the magic number, version, or
    /// section layout is unacceptable.
    pub fn from_bytes(raw: &'a [u8]) -> Result<Self, Error> {
        let (header, _) = Header::read_from_prefix(raw)
            .map_err(|_| Error::BadBlob("truncated header"))?;

        if header.magic.get() != FDT_MAGIC {
            return Err(Error::BadBlob("bad magic number"));
        }
        if header.version.get() < FIRST_SUPPORTED_VERSION {
            return Err(Error::BadBlob("header version too old"));
        }

        let totalsize = header.totalsize.get() as usize;
        if totalsize < size_of::<Header>() || totalsize > raw.len() {
            return Err(Error::BadBlob("totalsize inconsistent with input"));
        }

        let off_struct = header.off_dt_struct.get() as usize;
        let off_strings = header.off_dt_strings.get() as usize;
        let off_rsvmap = header.off_mem_rsvmap.get() as usize;
        if off_struct % 4 != 0 {
            return Err(Error::BadBlob("structure block misaligned"));
        }
        section(raw, off_struct, header.size_dt_struct.get() as usize, "structure block out of range")?;
        section(raw, off_strings, header.size_dt_strings.get() as usize, "string block out of range")?;
        if off_rsvmap < size_of::<Header>() || off_rsvmap > off_struct {
            return Err(Error::BadBlob("reserve map out of range"));
        }

        Ok(Fdt { raw, header })
    }

    /// The underlying bytes, in full.
    #[must_use]
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    #[must_use]
    pub fn magic(&self) -> u32 {
        self.header.magic.get()
    }

    #[must_use]
    pub fn totalsize(&self) -> usize {
        self.header.totalsize.get() as usize
    }

    #[must_use]
    pub fn off_dt_struct(&self) -> usize {
        self.header.off_dt_struct.get() as usize
    }

    #[must_use]
    pub fn off_dt_strings(&self) -> usize {
        self.header.off_dt_strings.get() as usize
    }

    #[must_use]
    pub fn off_mem_rsvmap(&self) -> usize {
        self.header.off_mem_rsvmap.get() as usize
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.header.version.get()
    }

    #[must_use]
    pub fn last_comp_version(&self) -> u32 {
        self.header.last_comp_version.get()
    }

    #[must_use]
    pub fn boot_cpuid_phys(&self) -> u32 {
        self.header.boot_cpuid_phys.get()
    }

    #[must_use]
    pub fn size_dt_strings(&self) -> usize {
        self.header.size_dt_strings.get() as usize
    }

    #[must_use]
    pub fn size_dt_struct(&self) -> usize {
        self.header.size_dt_struct.get() as usize
    }

    pub(crate) fn struct_block(&self) -> &'a [u8] {
        &self.raw[self.off_dt_struct()..self.off_dt_struct() + self.size_dt_struct()]
    }

    pub(crate) fn strings_block(&self) -> &'a [u8] {
        &self.raw[self.off_dt_strings()..self.off_dt_strings() + self.size_dt_strings()]
    }

    /// The nul-terminated string at `offset` in the string block.
    ///
    /// # Errors
    ///
    /// [`Error::BadStructure`] when `offset` is out of range, the string is
    /// unterminated, or it is not UTF-8.
    pub fn string(&self, offset: usize) -> Result<&'a str, Error> {
        let block = self.strings_block();
        let tail = block.get(offset..).ok_or(Error::BadStructure(offset))?;
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::BadStructure(offset))?;
        core::str::from_utf8(&tail[..nul]).map_err(|_| Error::BadStructure(offset))
    }

    /// Looks up the value of the property `name` on the node whose
    /// `BeginNode` tag sits at structure-block offset `node_offset`.
    ///
    /// Properties precede subnodes, so the scan stops at the first nested
    /// `BeginNode` or at the node's end. Any decoding problem reads as
    /// "no such property".
    #[must_use]
    pub fn property(&self, node_offset: usize, name: &str) -> Option<&'a [u8]> {
        use crate::tags::Tag;

        let (tag, mut offset) = self.tag_at(node_offset).ok()?;
        if !matches!(tag, Tag::BeginNode { .. }) {
            return None;
        }
        loop {
            let (tag, next) = self.tag_at(offset).ok()?;
            match tag {
                Tag::Prop { name_off, value } => {
                    if self.string(name_off).ok()? == name {
                        return Some(value);
                    }
                }
                Tag::Nop => {}
                _ => return None,
            }
            offset = next;
        }
    }

    /// Iterates the memory-reserve map up to its all-zero terminator.
    #[must_use]
    pub fn reserve_entries(&self) -> ReserveEntries<'a> {
        ReserveEntries {
            data: &self.raw[self.off_mem_rsvmap()..],
        }
    }
}

impl core::fmt::Debug for Fdt<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fdt")
            .field("totalsize", &self.totalsize())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

/// Iterator over `(address, size)` reserve-map records.
#[derive(Clone)]
pub struct ReserveEntries<'a> {
    data: &'a [u8],
}

impl Iterator for ReserveEntries<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let (entry, rest) = ReserveEntry::read_from_prefix(self.data).ok()?;
        self.data = rest;
        let (address, size) = (entry.address.get(), entry.size.get());
        if address == 0 && size == 0 {
            self.data = &[];
            return None;
        }
        Some((address, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(magic: u32, version: u32) -> [u8; 48] {
        let mut raw = [0u8; 48];
        raw[..4].copy_from_slice(&magic.to_be_bytes());
        raw[4..8].copy_from_slice(&48u32.to_be_bytes());
        raw[8..12].copy_from_slice(&48u32.to_be_bytes()); // off_dt_struct
        raw[12..16].copy_from_slice(&48u32.to_be_bytes()); // off_dt_strings
        raw[16..20].copy_from_slice(&40u32.to_be_bytes()); // off_mem_rsvmap
        raw[20..24].copy_from_slice(&version.to_be_bytes());
        raw[24..28].copy_from_slice(&16u32.to_be_bytes());
        raw
    }

    #[test]
    fn rejects_bad_magic() {
        let raw = header_bytes(0xdead_beef, 17);
        assert_eq!(
            Fdt::from_bytes(&raw).unwrap_err(),
            Error::BadBlob("bad magic number")
        );
    }

    #[test]
    fn rejects_old_version() {
        let raw = header_bytes(FDT_MAGIC, 3);
        assert_eq!(
            Fdt::from_bytes(&raw).unwrap_err(),
            Error::BadBlob("header version too old")
        );
    }

    #[test]
    fn rejects_truncated_input() {
        let raw = header_bytes(FDT_MAGIC, 17);
        assert!(matches!(
            Fdt::from_bytes(&raw[..20]).unwrap_err(),
            Error::BadBlob(_)
        ));
    }

    #[test]
    fn accepts_minimal_blob() {
        let raw = header_bytes(FDT_MAGIC, 17);
        let fdt = Fdt::from_bytes(&raw).unwrap();
        assert_eq!(fdt.version(), 17);
        assert_eq!(fdt.size_dt_struct(), 0);
        assert_eq!(fdt.reserve_entries().count(), 0);
    }
}
