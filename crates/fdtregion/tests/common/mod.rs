//! Shared fixtures: a small builder that produces valid blobs, and helpers
//! for running a selection end to end.
#![allow(dead_code)]

use fdtregion::{find_regions, render_dts, Fdt, FilterSet, Flags, Region, RenderOptions};

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const HEADER_SIZE: usize = 40;

/// Builds structure/strings/reserve-map sections and serialises them into a
/// version-17 blob. Calls mirror tree shape: `begin`/`end` pairs with
/// properties in between.
#[derive(Default)]
pub struct BlobBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    reserve: Vec<(u64, u64)>,
}

impl BlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memreserve(mut self, address: u64, size: u64) -> Self {
        self.reserve.push((address, size));
        self
    }

    pub fn begin(mut self, name: &str) -> Self {
        self.structure.extend_from_slice(&FDT_BEGIN_NODE.to_be_bytes());
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad();
        self
    }

    pub fn end(mut self) -> Self {
        self.structure.extend_from_slice(&FDT_END_NODE.to_be_bytes());
        self
    }

    pub fn nop(mut self) -> Self {
        self.structure.extend_from_slice(&FDT_NOP.to_be_bytes());
        self
    }

    pub fn prop(mut self, name: &str, value: &[u8]) -> Self {
        let name_off = self.string_offset(name);
        self.structure.extend_from_slice(&FDT_PROP.to_be_bytes());
        self.structure
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&name_off.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad();
        self
    }

    pub fn prop_u32(self, name: &str, cells: &[u32]) -> Self {
        let mut value = Vec::with_capacity(cells.len() * 4);
        for cell in cells {
            value.extend_from_slice(&cell.to_be_bytes());
        }
        self.prop(name, &value)
    }

    pub fn prop_str(self, name: &str, s: &str) -> Self {
        let mut value = Vec::with_capacity(s.len() + 1);
        value.extend_from_slice(s.as_bytes());
        value.push(0);
        self.prop(name, &value)
    }

    pub fn build(mut self) -> Vec<u8> {
        self.structure.extend_from_slice(&FDT_END.to_be_bytes());

        let off_mem_rsvmap = HEADER_SIZE; // already 8-aligned
        let rsvmap_size = (self.reserve.len() + 1) * 16;
        let off_dt_struct = off_mem_rsvmap + rsvmap_size;
        let off_dt_strings = off_dt_struct + self.structure.len();
        let totalsize = off_dt_strings + self.strings.len();

        let mut blob = Vec::with_capacity(totalsize);
        for field in [
            0xd00d_feedu32,
            totalsize as u32,
            off_dt_struct as u32,
            off_dt_strings as u32,
            off_mem_rsvmap as u32,
            17, // version
            16, // last_comp_version
            0,  // boot_cpuid_phys
            self.strings.len() as u32,
            self.structure.len() as u32,
        ] {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        for (address, size) in &self.reserve {
            blob.extend_from_slice(&address.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&[0; 16]); // terminator record
        blob.extend_from_slice(&self.structure);
        blob.extend_from_slice(&self.strings);
        blob
    }

    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let mut offset = 0;
        while offset < self.strings.len() {
            let end = offset
                + self.strings[offset..]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap();
            if &self.strings[offset..end] == name.as_bytes() {
                return offset as u32;
            }
            offset = end + 1;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset
    }
}

/// The tree most tests grep over:
///
/// ```dts
/// / {
///     a {
///         b = <0x1>;
///         c = <0x2>;
///     };
///     d {
///     };
/// };
/// ```
pub fn demo_blob() -> Vec<u8> {
    BlobBuilder::new()
        .begin("")
        .begin("a")
        .prop_u32("b", &[1])
        .prop_u32("c", &[2])
        .end()
        .begin("d")
        .end()
        .end()
        .build()
}

/// A tree selected by compatible strings:
///
/// ```dts
/// / {
///     soc {
///         uart {
///             compatible = "v,u";
///             reg = <0x100 0x10>;
///         };
///         gpio {
///             compatible = "v,g";
///         };
///     };
/// };
/// ```
pub fn compat_blob() -> Vec<u8> {
    BlobBuilder::new()
        .begin("")
        .begin("soc")
        .begin("uart")
        .prop_str("compatible", "v,u")
        .prop_u32("reg", &[0x100, 0x10])
        .end()
        .begin("gpio")
        .prop_str("compatible", "v,g")
        .end()
        .end()
        .end()
        .build()
}

/// Runs a complete selection and renders the result with default options.
pub fn dts_for(raw: &[u8], filters: &FilterSet, flags: Flags) -> String {
    let fdt = Fdt::from_bytes(raw).unwrap();
    let regions = find_regions(&fdt, filters, flags).unwrap();
    render(raw, &regions, flags)
}

pub fn render(raw: &[u8], regions: &[Region], flags: Flags) -> String {
    let fdt = Fdt::from_bytes(raw).unwrap();
    let mut out = String::new();
    render_dts(&fdt, regions, flags, &RenderOptions::default(), &mut out).unwrap();
    out
}

/// The selected bytes, in region order.
pub fn region_bytes(raw: &[u8], regions: &[Region]) -> Vec<u8> {
    let mut out = Vec::new();
    for region in regions {
        out.extend_from_slice(&raw[region.offset..region.offset + region.size]);
    }
    out
}
