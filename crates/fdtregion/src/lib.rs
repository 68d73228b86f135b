//! Select and reassemble regions of a flattened devicetree blob.
//!
//! Given a blob and a set of include/exclude rules over node paths,
//! property names and compatible strings, this crate computes the byte
//! [`Region`]s of the blob that cover the selected parts of the tree,
//! optionally pulled into well-formed shape by their ancestors, and can
//! emit them as devicetree source or as a reassembled binary.
//!
//! ```no_run
//! use fdtregion::{find_regions, Fdt, FilterKind, FilterSet, Flags};
//!
//! let blob: &[u8]; // Get the blob from a file/memory/...
//! # blob = todo!();
//! let fdt = Fdt::from_bytes(blob)?;
//!
//! let mut filters = FilterSet::new();
//! filters.include(FilterKind::COMPAT, "vendor,uart").unwrap();
//!
//! let regions = find_regions(&fdt, &filters, Flags::SUPERNODES)?;
//! for region in &regions {
//!     println!("{:#x}..{:#x}", region.offset, region.end());
//! }
//! # Ok::<(), fdtregion::Error>(())
//! ```
//!
//! The walk behind [`find_regions`] is exposed as [`RegionState`] for
//! callers that want to drain regions into a bounded buffer and resume.

#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

mod assemble;
mod error;
mod fdt;
mod filter;
mod regions;
mod render;
mod tags;

pub use assemble::assemble_regions;
pub use error::Error;
pub use fdt::{Fdt, ReserveEntries};
pub use filter::{Decision, FilterError, FilterKind, FilterSet, Predicate};
pub use regions::{find_regions, Flags, Region, RegionState, DEFAULT_PATH_CAPACITY, MAX_DEPTH};
pub use render::{render_dts, RenderOptions};
pub use tags::Tag;
