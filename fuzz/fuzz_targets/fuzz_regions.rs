#![no_main]

use fdtregion::{find_regions, Fdt, FilterKind, FilterSet, Flags};
use libfuzzer_sys::fuzz_target;

// One byte of walk flags, one byte choosing the filter shape, then the
// candidate blob. Rejections and walk errors are the expected outcome for
// most inputs; the target only cares that nothing panics or runs away.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let flags = Flags::from_bits_truncate(u32::from(data[0]));
    let selector = data[1];
    let Ok(fdt) = Fdt::from_bytes(&data[2..]) else {
        return;
    };

    let mut filters = FilterSet::new();
    let _ = match selector % 5 {
        0 => filters.include(FilterKind::PROP, "compatible"),
        1 => filters.include(FilterKind::NODE, "/"),
        2 => filters.exclude(FilterKind::NODE, "/chosen"),
        3 => filters.include(FilterKind::ANY, "fuzz"),
        _ => filters.include(FilterKind::COMPAT, "fuzz,device"),
    };
    if selector & 0x80 != 0 {
        let _ = filters.invert();
    }

    let _ = find_regions(&fdt, &filters, flags);
});
