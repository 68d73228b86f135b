//! The region-selection walk.
//!
//! [`RegionState`] scans the structure block tag by tag, consults the
//! caller's [`Predicate`] at every node and property, and yields the byte
//! [`Region`]s of the blob that cover the selected tags. A region opens at
//! the first included tag after an excluded one and closes just before the
//! next excluded tag; adjacent or overlapping regions coalesce.
//!
//! The walk is resumable: [`RegionState::next_regions`] fills the caller's
//! slice and returns early when it is full. Every loop iteration works on a
//! copy of the volatile pointers (`next_offset`, `depth`, `want`, phase,
//! path cursor) and commits the copy back only once the whole iteration,
//! region write included, has succeeded. A paused call therefore
//! re-processes the exact tag that did not fit, and no tag is
//! half-consumed or emitted twice across the pause.
//!
//! `want` is what the walk pulls in when the predicate answers
//! [`Decision::DontKnow`]: selecting a node wants its properties too, a
//! directly entered subnode wants only its open/close tags, and the value
//! decays one step per depth unless [`Flags::ALL_SUBNODES`] keeps it
//! saturated.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::Error;
use crate::fdt::Fdt;
use crate::filter::{Decision, Predicate};
use crate::tags::Tag;

/// Maximum node nesting the ancestor stack can hold.
pub const MAX_DEPTH: usize = 64;

/// Default capacity of the internal path buffer, in bytes.
pub const DEFAULT_PATH_CAPACITY: usize = 1024;

const INITIAL_REGION_SLOTS: usize = 100;

bitflags::bitflags! {
    /// Knobs controlling what the walk pulls in beyond plain predicate
    /// matches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        /// Emit the `BeginNode`/`EndNode` tags of every ancestor of a
        /// selected tag. Without this the output is a fragment suitable
        /// for hashing but not a well-formed tree.
        const SUPERNODES = 1 << 0;
        /// When a node is selected, also emit the open/close tags of its
        /// immediate children (but not their properties).
        const DIRECT_SUBNODES = 1 << 1;
        /// When a node is selected, emit its entire subtree.
        const ALL_SUBNODES = 1 << 2;
        /// Append the string table as a trailing region.
        const ADD_STRING_TAB = 1 << 3;
        /// Prepend the memory-reserve map as a leading region.
        const ADD_MEM_RSVMAP = 1 << 4;
    }
}

/// A contiguous selected byte range, absolute within the blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    /// Absolute byte offset of the first selected byte.
    pub offset: usize,
    /// Number of selected bytes; never zero in emitted regions.
    pub size: usize,
}

impl Region {
    /// One past the last selected byte.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum Want {
    #[default]
    Nothing,
    NodesOnly,
    NodesAndProps,
    AllNodesAndProps,
}

impl Want {
    fn decay(self) -> Self {
        match self {
            Want::AllNodesAndProps => Want::AllNodesAndProps,
            Want::NodesAndProps => Want::NodesOnly,
            Want::NodesOnly | Want::Nothing => Want::Nothing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Nothing,
    MemRsvmap,
    Struct,
    EndTag,
    Strings,
}

/// One ancestor on the stack: where its `BeginNode` sits, the `want` to
/// restore when it closes, and whether a region already covers it.
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    offset: usize,
    want: Want,
    included: bool,
}

/// The volatile pointer set. Copied at the top of every iteration and
/// committed only on success; this is what makes pausing safe.
#[derive(Debug, Clone, Copy)]
struct Ptrs {
    next_offset: usize,
    depth: i32,
    want: Want,
    done: Phase,
    path_len: usize,
}

/// Resumable state of one region-selection walk over one blob.
pub struct RegionState<'a, P: ?Sized> {
    fdt: Fdt<'a>,
    predicate: &'a P,
    flags: Flags,
    path: String,
    path_cap: usize,
    stack: [Frame; MAX_DEPTH],
    ptrs: Ptrs,
    /// Structure-block offset where the currently open region started.
    start: Option<usize>,
    can_merge: bool,
}

impl<'a, P: Predicate + ?Sized> RegionState<'a, P> {
    /// Sets up a walk with the default path-buffer capacity.
    pub fn new(fdt: &Fdt<'a>, predicate: &'a P, flags: Flags) -> Self {
        Self::with_path_capacity(fdt, predicate, flags, DEFAULT_PATH_CAPACITY)
    }

    /// Sets up a walk whose path buffer holds at most `path_cap` bytes.
    /// A node whose full path does not fit makes the walk fail with
    /// [`Error::NoSpace`].
    pub fn with_path_capacity(
        fdt: &Fdt<'a>,
        predicate: &'a P,
        flags: Flags,
        path_cap: usize,
    ) -> Self {
        RegionState {
            fdt: *fdt,
            predicate,
            flags,
            path: String::new(),
            path_cap,
            stack: [Frame::default(); MAX_DEPTH],
            ptrs: Ptrs {
                next_offset: 0,
                depth: -1,
                want: Want::Nothing,
                done: Phase::Nothing,
                path_len: 0,
            },
            start: None,
            can_merge: true,
        }
    }

    /// Continues the walk, writing regions into `out` in ascending offset
    /// order.
    ///
    /// Returns the number of regions written. The call returns early when
    /// `out` fills up; calling again resumes at the exact tag that did not
    /// fit. `Ok(0)` means the walk has completed; a walk in progress
    /// always produces at least the region covering the `End` tag.
    ///
    /// # Panics
    ///
    /// Panics when `out` is empty.
    ///
    /// # Errors
    ///
    /// Any [`Error`] is fatal; the walk cannot be resumed past it.
    pub fn next_regions(&mut self, out: &mut [Region]) -> Result<usize, Error> {
        assert!(!out.is_empty(), "next_regions needs at least one output slot");

        let mut count = 0;
        let base = self.fdt.off_dt_struct();

        if self.ptrs.done < Phase::MemRsvmap && self.flags.contains(Flags::ADD_MEM_RSVMAP) {
            // Everything between the reserve map and the structure block,
            // in a region of its own.
            let offset = self.fdt.off_mem_rsvmap();
            if !self.push_region(out, &mut count, offset, base - offset) {
                return Ok(count);
            }
            self.can_merge = false;
            self.ptrs.done = Phase::MemRsvmap;
        }

        while self.ptrs.done < Phase::Struct {
            let mut p = self.ptrs;
            self.path.truncate(p.path_len);

            let offset = p.next_offset;
            let (tag, next_offset) = self.fdt.tag_at(offset)?;
            p.next_offset = next_offset;
            // If this tag turns out to end a region, the region by default
            // closes after it; the handlers below pull `stop_at` back to
            // `offset` when the tag itself must stay out.
            let mut stop_at = next_offset;
            let include;

            match tag {
                Tag::Prop { name_off, .. } => {
                    stop_at = offset;
                    let name = self.fdt.prop_name(name_off)?;
                    match self.predicate.prop(&self.fdt, offset, name) {
                        Decision::DontKnow => include = p.want >= Want::NodesAndProps,
                        decision => {
                            include = decision == Decision::Include;
                            // A property matched inside an unselected node
                            // still needs that node's closing tag.
                            if include
                                && p.want == Want::Nothing
                                && self.flags.contains(Flags::SUPERNODES)
                            {
                                p.want = Want::NodesOnly;
                            }
                        }
                    }
                }

                Tag::Nop => {
                    stop_at = offset;
                    include = p.want >= Want::NodesAndProps;
                }

                Tag::BeginNode { name } => {
                    p.depth += 1;
                    if p.depth as usize == MAX_DEPTH {
                        return Err(Error::TooDeep);
                    }
                    if p.path_len + 2 + name.len() >= self.path_cap {
                        return Err(Error::NoSpace);
                    }
                    if p.path_len != 1 {
                        self.path.push('/');
                    }
                    self.path.push_str(name);
                    p.path_len = self.path.len();

                    let depth = p.depth as usize;
                    self.stack[depth].want = p.want;
                    self.stack[depth].offset = offset;

                    // Unless subnodes are being entered, this node stands
                    // on its own: close any open region before its tag and
                    // let the predicate start from nothing.
                    if p.want == Want::NodesOnly
                        || !self
                            .flags
                            .intersects(Flags::DIRECT_SUBNODES | Flags::ALL_SUBNODES)
                    {
                        stop_at = offset;
                        p.want = Want::Nothing;
                    }

                    match self.predicate.node(&self.fdt, offset, &self.path) {
                        Decision::Include => {
                            p.want = if self.flags.contains(Flags::ALL_SUBNODES) {
                                Want::AllNodesAndProps
                            } else {
                                Want::NodesAndProps
                            };
                        }
                        _ if p.want != Want::Nothing => p.want = p.want.decay(),
                        _ => stop_at = offset,
                    }

                    include = p.want != Want::Nothing;
                    self.stack[depth].included = include;
                }

                Tag::EndNode => {
                    if p.depth < 0 {
                        return Err(Error::BadStructure(offset));
                    }
                    include = p.want != Want::Nothing;
                    if p.want == Want::Nothing && !self.flags.contains(Flags::DIRECT_SUBNODES) {
                        stop_at = offset;
                    }
                    p.want = self.stack[p.depth as usize].want;
                    p.depth -= 1;
                    let cut = self.path.rfind('/').unwrap_or(0);
                    self.path.truncate(cut);
                    p.path_len = cut;
                }

                Tag::End => {
                    include = true;
                    p.done = Phase::Struct;
                }
            }

            if include {
                if self.start.is_none() {
                    if self.flags.contains(Flags::SUPERNODES)
                        && !self.include_supernodes(out, &mut count, p.depth)?
                    {
                        return Ok(count);
                    }
                    self.start = Some(offset);
                }
            } else if let Some(start) = self.start {
                if !self.push_region(out, &mut count, base + start, stop_at - start) {
                    return Ok(count);
                }
                self.start = None;
                self.can_merge = true;
            }

            self.ptrs = p;
        }

        if self.ptrs.done < Phase::EndTag {
            if self.ptrs.next_offset != self.fdt.size_dt_struct() {
                return Err(Error::BadStructure(self.ptrs.next_offset));
            }
            // The END tag is always included, so a region is open here;
            // flush it out to the declared end of the structure block.
            if let Some(start) = self.start {
                if !self.push_region(out, &mut count, base + start, self.ptrs.next_offset - start)
                {
                    return Ok(count);
                }
            }
            self.ptrs.done = Phase::EndTag;
        }

        if self.ptrs.done < Phase::Strings && self.flags.contains(Flags::ADD_STRING_TAB) {
            self.can_merge = false;
            if self.fdt.off_dt_strings() < base + self.ptrs.next_offset {
                return Err(Error::BadLayout);
            }
            if !self.push_region(
                out,
                &mut count,
                self.fdt.off_dt_strings(),
                self.fdt.size_dt_strings(),
            ) {
                return Ok(count);
            }
            self.ptrs.done = Phase::Strings;
        }

        Ok(count)
    }

    /// Backfills one-tag regions for every ancestor not yet covered, root
    /// first, and forces their closing tags to be emitted later. Ancestors
    /// already covered were marked on the stack when their region was
    /// written, so a resumed call picks up where the failed one stopped.
    fn include_supernodes(
        &mut self,
        out: &mut [Region],
        count: &mut usize,
        depth: i32,
    ) -> Result<bool, Error> {
        let base = self.fdt.off_dt_struct();
        for i in 0..(depth + 1).max(0) as usize {
            if !self.stack[i].included {
                let start = self.stack[i].offset;
                let (_, end) = self.fdt.tag_at(start)?;
                if !self.push_region(out, count, base + start, end - start) {
                    return Ok(false);
                }
                self.stack[i].included = true;
                self.can_merge = true;
            }
            if self.stack[i].want == Want::Nothing {
                self.stack[i].want = Want::NodesOnly;
            }
        }
        Ok(true)
    }

    /// Appends a region to `out`, merging it into the previous one when
    /// allowed and overlapping. Returns `false` when `out` is full, which
    /// pauses the walk.
    fn push_region(&self, out: &mut [Region], count: &mut usize, offset: usize, size: usize) -> bool {
        if self.can_merge && *count > 0 && offset <= out[*count - 1].end() {
            let last = &mut out[*count - 1];
            last.size = offset + size - last.offset;
            true
        } else if *count < out.len() {
            out[*count] = Region { offset, size };
            *count += 1;
            true
        } else {
            false
        }
    }
}

impl<P: ?Sized> core::fmt::Debug for RegionState<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionState")
            .field("next_offset", &self.ptrs.next_offset)
            .field("depth", &self.ptrs.depth)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Runs a complete walk and collects the regions.
///
/// The output array is preallocated and the walk restarted with double the
/// capacity if it fills, so the state machine itself never grows memory
/// mid-walk.
///
/// # Errors
///
/// Propagates any walk error; see [`Error`].
pub fn find_regions<P: Predicate + ?Sized>(
    fdt: &Fdt<'_>,
    predicate: &P,
    flags: Flags,
) -> Result<Vec<Region>, Error> {
    let mut slots = INITIAL_REGION_SLOTS;
    loop {
        let mut regions = vec![Region::default(); slots];
        let mut state = RegionState::new(fdt, predicate, flags);
        let filled = state.next_regions(&mut regions)?;
        if filled < regions.len() {
            regions.truncate(filled);
            return Ok(regions);
        }
        // A full array may hide more regions; rewalk with room to spare.
        slots *= 2;
    }
}
