//! Binary reassembly of selected regions.
//!
//! The output is the region bytes back to back, optionally preceded by a
//! freshly computed header. The result is only a valid blob when the
//! region list carries the pieces a blob needs: supernodes for tree shape,
//! the reserve map up front and the string table at the back (the
//! [`Flags`] tell the assembler which of those are present).

use alloc::vec::Vec;

use zerocopy::byteorder::big_endian::U32;
use zerocopy::IntoBytes;

use crate::fdt::{Fdt, Header, ReserveEntry, FDT_MAGIC, FIRST_SUPPORTED_VERSION, LAST_SUPPORTED_VERSION};
use crate::regions::{Flags, Region};

fn align_to(n: usize, alignment: usize) -> usize {
    (n + alignment - 1) & !(alignment - 1)
}

/// Concatenates the selected `regions` of `fdt`, with a reconstructed
/// header in front when `with_header` is set.
///
/// With [`Flags::ADD_MEM_RSVMAP`] the first region is taken to be the
/// reserve map and the structure offset is advanced past it; with
/// [`Flags::ADD_STRING_TAB`] the last region is taken to be the string
/// table and the string offsets/sizes are derived from it. Both must have
/// been set on the walk that produced `regions` for the header fields to
/// come out right.
#[must_use]
pub fn assemble_regions(
    fdt: &Fdt<'_>,
    regions: &[Region],
    flags: Flags,
    with_header: bool,
) -> Vec<u8> {
    let rsvmap_start = align_to(size_of::<Header>(), size_of::<ReserveEntry>());
    let mut struct_start = rsvmap_start;

    let mut size: usize = regions.iter().map(|region| region.size).sum();
    if !regions.is_empty() && flags.contains(Flags::ADD_MEM_RSVMAP) {
        struct_start += regions[0].size;
        size -= regions[0].size;
    }

    let mut header = Header {
        magic: U32::new(FDT_MAGIC),
        totalsize: U32::new(0),
        off_dt_struct: U32::new(struct_start as u32),
        off_dt_strings: U32::new(0),
        off_mem_rsvmap: U32::new(rsvmap_start as u32),
        version: U32::new(LAST_SUPPORTED_VERSION),
        last_comp_version: U32::new(FIRST_SUPPORTED_VERSION),
        boot_cpuid_phys: U32::new(0),
        size_dt_strings: U32::new(0),
        size_dt_struct: U32::new(0),
    };
    if regions.len() >= 2 && flags.contains(Flags::ADD_STRING_TAB) {
        let str_size = regions[regions.len() - 1].size;
        header.size_dt_struct = U32::new((size - str_size) as u32);
        header.off_dt_strings = U32::new((struct_start + size - str_size) as u32);
        header.size_dt_strings = U32::new(str_size as u32);
        header.totalsize = U32::new((struct_start + size) as u32);
    }

    let mut out = Vec::with_capacity(rsvmap_start + size + regions.first().map_or(0, |r| r.size));
    if with_header {
        out.extend_from_slice(header.as_bytes());
        out.resize(rsvmap_start, 0);
    }
    for region in regions {
        out.extend_from_slice(&fdt.raw()[region.offset..region.end()]);
    }
    out
}
