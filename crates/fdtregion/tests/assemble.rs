//! Binary reassembly: raw fragments and full blob round-trips.

mod common;

use common::{demo_blob, region_bytes, BlobBuilder};
use fdtregion::{
    assemble_regions, find_regions, Fdt, FilterKind, FilterSet, Flags, Tag,
};

fn everything() -> FilterSet {
    let mut filters = FilterSet::new();
    filters.include(FilterKind::NODE, "/").unwrap();
    filters
}

/// Flattens the tag stream into a comparable sequence.
fn tags_of(fdt: &Fdt<'_>) -> Vec<String> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let (tag, next) = fdt.tag_at(offset).unwrap();
        match tag {
            Tag::BeginNode { name } => out.push(format!("begin {name}")),
            Tag::EndNode => out.push("end".to_string()),
            Tag::Prop { name_off, value } => out.push(format!(
                "prop {} {:?}",
                fdt.prop_name(name_off).unwrap(),
                value
            )),
            Tag::Nop => out.push("nop".to_string()),
            Tag::End => break,
        }
        offset = next;
    }
    out
}

#[test]
fn bin_output_is_the_region_bytes_verbatim() {
    let raw = demo_blob();
    let fdt = Fdt::from_bytes(&raw).unwrap();
    let mut filters = FilterSet::new();
    filters.include(FilterKind::PROP, "b").unwrap();
    let regions = find_regions(&fdt, &filters, Flags::SUPERNODES).unwrap();

    let bin = assemble_regions(&fdt, &regions, Flags::SUPERNODES, false);
    assert_eq!(bin, region_bytes(&raw, &regions));
}

#[test]
fn dtb_roundtrip_preserves_structure_and_strings() {
    let raw = BlobBuilder::new()
        .memreserve(0x1000, 0x2000)
        .begin("")
        .begin("a")
        .prop_u32("b", &[1])
        .prop_u32("c", &[2])
        .end()
        .begin("d")
        .end()
        .end()
        .build();
    let fdt = Fdt::from_bytes(&raw).unwrap();
    let flags = Flags::SUPERNODES
        | Flags::ALL_SUBNODES
        | Flags::ADD_MEM_RSVMAP
        | Flags::ADD_STRING_TAB;
    let regions = find_regions(&fdt, &everything(), flags).unwrap();

    let rebuilt = assemble_regions(&fdt, &regions, flags, true);
    let out = Fdt::from_bytes(&rebuilt).unwrap();

    // Same tree, same reserve map, same string data; only the header
    // layout may differ.
    assert_eq!(tags_of(&out), tags_of(&fdt));
    assert_eq!(
        out.reserve_entries().collect::<Vec<_>>(),
        fdt.reserve_entries().collect::<Vec<_>>()
    );
    assert_eq!(out.size_dt_struct(), fdt.size_dt_struct());
    assert_eq!(out.size_dt_strings(), fdt.size_dt_strings());
    assert_eq!(out.version(), 17);
    assert_eq!(out.last_comp_version(), 16);
    assert_eq!(out.totalsize(), rebuilt.len());

    // Grepping the rebuilt blob again selects regions of the same shape.
    let again = find_regions(&out, &everything(), flags).unwrap();
    assert_eq!(
        again.iter().map(|r| r.size).collect::<Vec<_>>(),
        regions.iter().map(|r| r.size).collect::<Vec<_>>()
    );
}

#[test]
fn dtb_header_is_padded_to_the_reserve_map() {
    let raw = demo_blob();
    let fdt = Fdt::from_bytes(&raw).unwrap();
    let flags = Flags::SUPERNODES
        | Flags::ALL_SUBNODES
        | Flags::ADD_MEM_RSVMAP
        | Flags::ADD_STRING_TAB;
    let regions = find_regions(&fdt, &everything(), flags).unwrap();
    let rebuilt = assemble_regions(&fdt, &regions, flags, true);

    assert_eq!(&rebuilt[..4], &0xd00d_feedu32.to_be_bytes());
    // 40-byte header, zero-padded to the 48-byte reserve-map offset.
    assert!(rebuilt[40..48].iter().all(|&b| b == 0));
    let out = Fdt::from_bytes(&rebuilt).unwrap();
    assert_eq!(out.off_mem_rsvmap(), 48);
    assert_eq!(out.off_dt_struct(), 48 + 16); // one terminator record
}

#[test]
fn headerless_output_starts_at_the_first_region() {
    let raw = demo_blob();
    let fdt = Fdt::from_bytes(&raw).unwrap();
    let regions = find_regions(&fdt, &everything(), Flags::SUPERNODES | Flags::ALL_SUBNODES)
        .unwrap();
    let bin = assemble_regions(&fdt, &regions, Flags::SUPERNODES | Flags::ALL_SUBNODES, false);
    assert_eq!(
        &bin[..4],
        &raw[regions[0].offset..regions[0].offset + 4]
    );
}
