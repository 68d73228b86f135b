//! Devicetree-source rendering of selected regions.
//!
//! The renderer re-walks the tag stream with a cursor over the sorted
//! region list and emits one line per tag whose file offset lies inside a
//! region. Depth is tracked across skipped tags so indentation stays
//! consistent whatever the selection looks like.

use core::fmt::Write;

use crate::error::Error;
use crate::fdt::Fdt;
use crate::regions::{Flags, Region};
use crate::tags::Tag;

/// Spaces per indent level.
const SHIFT: usize = 4;

const COL_RED: u32 = 1;
const COL_GREEN: u32 = 2;

/// Presentation knobs for [`render_dts`]. All default to off.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Show every tag, not just the selected ones.
    pub all: bool,
    /// Prefix lines with `+` (selected) or `-` (not selected).
    pub diff: bool,
    /// Prefix lines with the absolute file offset.
    pub show_addr: bool,
    /// Prefix lines with the structure-block offset.
    pub show_offset: bool,
    /// Colour selected lines green and unselected ones red.
    pub colour: bool,
    /// Emit a comment block with the header fields first.
    pub header: bool,
    /// Put `/dts-v1/;` on the first line.
    pub dts_version: bool,
    /// Append a listing of the string table.
    pub list_strings: bool,
}

fn set_colour<W: Write>(out: &mut W, col: u32) -> core::fmt::Result {
    write!(out, "\x1b[1;{}m", col + 30)
}

fn reset_colour<W: Write>(out: &mut W) -> core::fmt::Result {
    write!(out, "\x1b[0m")
}

fn header_comment<W: Write>(fdt: &Fdt<'_>, out: &mut W) -> core::fmt::Result {
    writeln!(out, "// magic:\t\t{:#x}", fdt.magic())?;
    writeln!(
        out,
        "// totalsize:\t\t{:#x} ({})",
        fdt.totalsize(),
        fdt.totalsize()
    )?;
    writeln!(out, "// off_dt_struct:\t{:#x}", fdt.off_dt_struct())?;
    writeln!(out, "// off_dt_strings:\t{:#x}", fdt.off_dt_strings())?;
    writeln!(out, "// off_mem_rsvmap:\t{:#x}", fdt.off_mem_rsvmap())?;
    writeln!(out, "// version:\t\t{}", fdt.version())?;
    writeln!(out, "// last_comp_version:\t{}", fdt.last_comp_version())?;
    writeln!(out, "// boot_cpuid_phys:\t{:#x}", fdt.boot_cpuid_phys())?;
    writeln!(out, "// size_dt_strings:\t{:#x}", fdt.size_dt_strings())?;
    if fdt.version() >= 17 {
        writeln!(out, "// size_dt_struct:\t{:#x}", fdt.size_dt_struct())?;
    }
    writeln!(out)
}

fn is_printable_strings(data: &[u8]) -> bool {
    if data.last() != Some(&0) {
        return false;
    }
    let mut rest = data;
    while !rest.is_empty() {
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return false;
        };
        if nul == 0 || !rest[..nul].iter().all(|&b| (0x20..0x7f).contains(&b)) {
            return false;
        }
        rest = &rest[nul + 1..];
    }
    true
}

/// Writes a property value the way devicetree sources spell them: quoted
/// strings when the data reads as one, `<...>` cells when it is a whole
/// number of 32-bit words, a `[...]` byte list otherwise. Empty values
/// (boolean properties) write nothing.
fn format_value<W: Write>(out: &mut W, value: &[u8]) -> core::fmt::Result {
    if value.is_empty() {
        return Ok(());
    }
    if is_printable_strings(value) {
        write!(out, " = ")?;
        for (i, member) in value[..value.len() - 1].split(|&b| b == 0).enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            write!(out, "\"{}\"", core::str::from_utf8(member).unwrap_or_default())?;
        }
    } else if value.len() % 4 == 0 {
        write!(out, " = <")?;
        for (i, cell) in value.chunks_exact(4).enumerate() {
            if i > 0 {
                write!(out, " ")?;
            }
            let cell = u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]);
            write!(out, "{cell:#x}")?;
        }
        write!(out, ">")?;
    } else {
        write!(out, " = [")?;
        for (i, byte) in value.iter().enumerate() {
            if i > 0 {
                write!(out, " ")?;
            }
            write!(out, "{byte:02x}")?;
        }
        write!(out, "]")?;
    }
    Ok(())
}

/// Renders the selected regions of `fdt` as devicetree source.
///
/// `flags` should be the same set the regions were produced with; it
/// decides whether `/memreserve/` lines are emitted.
///
/// # Errors
///
/// [`Error::BadStructure`] on a corrupt tag stream, [`Error::Write`] when
/// the sink refuses output.
pub fn render_dts<W: Write>(
    fdt: &Fdt<'_>,
    regions: &[Region],
    flags: Flags,
    opts: &RenderOptions,
    out: &mut W,
) -> Result<(), Error> {
    if opts.dts_version {
        writeln!(out, "/dts-v1/;")?;
    }
    if opts.header {
        header_comment(fdt, out)?;
    }
    if flags.contains(Flags::ADD_MEM_RSVMAP) {
        for (address, size) in fdt.reserve_entries() {
            writeln!(out, "/memreserve/ {address:x} {size:x};")?;
        }
    }

    let base = fdt.off_dt_struct();
    let mut cursor = 0;
    let mut depth = 0usize;
    let mut offset = 0;
    loop {
        let file_ofs = base + offset;
        while cursor < regions.len() && file_ofs >= regions[cursor].end() {
            cursor += 1;
        }
        let in_region = cursor < regions.len()
            && file_ofs >= regions[cursor].offset
            && file_ofs < regions[cursor].end();

        let (tag, next_offset) = fdt.tag_at(offset)?;
        if tag == Tag::End {
            break;
        }

        let show = in_region || opts.all;
        if show && opts.diff {
            write!(out, "{}", if in_region { '+' } else { '-' })?;
        }
        if !show {
            // Keep the depth honest even for skipped tags.
            match tag {
                Tag::BeginNode { .. } => depth += 1,
                Tag::EndNode => depth = depth.saturating_sub(1),
                _ => {}
            }
            offset = next_offset;
            continue;
        }

        if opts.show_addr {
            write!(out, "{file_ofs:4x}: ")?;
        }
        if opts.show_offset {
            write!(out, "{offset:4x}: ")?;
        }
        if opts.colour {
            set_colour(out, if in_region { COL_GREEN } else { COL_RED })?;
        }

        match tag {
            Tag::Prop { name_off, value } => {
                let name = fdt.prop_name(name_off)?;
                write!(out, "{:1$}{name}", "", depth * SHIFT)?;
                format_value(out, value)?;
                write!(out, ";")?;
            }
            Tag::Nop => {
                write!(out, "{:1$}// [NOP]", "", depth * SHIFT)?;
            }
            Tag::BeginNode { name } => {
                let name = if name.is_empty() { "/" } else { name };
                write!(out, "{:1$}{name} {{", "", depth * SHIFT)?;
                depth += 1;
            }
            Tag::EndNode => {
                depth = depth.saturating_sub(1);
                write!(out, "{:1$}}};", "", depth * SHIFT)?;
            }
            Tag::End => unreachable!(),
        }

        if opts.colour {
            reset_colour(out)?;
        }
        writeln!(out)?;
        offset = next_offset;
    }

    if opts.list_strings {
        let str_base = fdt.off_dt_strings();
        let mut offset = 0;
        while offset < fdt.size_dt_strings() {
            let string = fdt.string(offset)?;
            let len = string.len() + 1;
            let file_ofs = str_base + offset;
            while cursor < regions.len() && file_ofs >= regions[cursor].end() {
                cursor += 1;
            }
            let in_region = cursor < regions.len()
                && file_ofs >= regions[cursor].offset
                && file_ofs + len <= regions[cursor].end();
            if (in_region || opts.all) && opts.diff {
                write!(out, "{}", if in_region { '+' } else { '-' })?;
            }
            if opts.show_addr {
                write!(out, "{file_ofs:4x}: ")?;
            }
            if opts.show_offset {
                write!(out, "{offset:4x}: ")?;
            }
            writeln!(out, "{string}")?;
            offset += len;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    fn formatted(value: &[u8]) -> String {
        let mut out = String::new();
        format_value(&mut out, value).unwrap();
        out
    }

    #[test]
    fn boolean_properties_have_no_value() {
        assert_eq!(formatted(b""), "");
    }

    #[test]
    fn strings_render_quoted() {
        assert_eq!(formatted(b"okay\0"), " = \"okay\"");
        assert_eq!(
            formatted(b"vendor,uart\0vendor,serial\0"),
            " = \"vendor,uart\", \"vendor,serial\""
        );
    }

    #[test]
    fn word_multiples_render_as_cells() {
        assert_eq!(formatted(&[0, 0, 0, 1, 0, 0, 2, 0]), " = <0x1 0x200>");
    }

    #[test]
    fn odd_sizes_render_as_bytes() {
        assert_eq!(formatted(&[0xde, 0xad, 0xbe]), " = [de ad be]");
    }

    #[test]
    fn empty_string_members_are_not_strings() {
        // A lone nul is a 1-byte value, not an empty string list.
        assert_eq!(formatted(&[0]), " = [00]");
        assert!(!is_printable_strings(b"a\0\0"));
        assert!(!is_printable_strings(b"abc"));
    }
}
