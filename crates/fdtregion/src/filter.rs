//! Include/exclude classification of nodes, properties and compatible
//! strings.
//!
//! A [`FilterSet`] is built once from match rules and then consulted by the
//! region walk through the [`Predicate`] trait. Include and exclude rules
//! cannot coexist for the same kind: an include rule set means "everything
//! unmentioned is excluded", an exclude rule set means the opposite, and
//! mixing the two for one kind has no coherent reading.

use alloc::string::String;
use alloc::vec::Vec;

use thiserror::Error;

use crate::fdt::Fdt;
use crate::tags::stringlist_contains;

bitflags::bitflags! {
    /// What a match rule applies to. Rules may cover several kinds at
    /// once; [`FilterKind::ANY`] is the "match anything" rule kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterKind: u32 {
        /// Full node paths, `/soc/uart` style.
        const NODE = 1 << 0;
        /// Property names.
        const PROP = 1 << 1;
        /// Members of a node's `compatible` string list.
        const COMPAT = 1 << 2;
        /// Any of the above.
        const ANY = Self::NODE.bits() | Self::PROP.bits() | Self::COMPAT.bits();
    }
}

/// A classification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The candidate is selected.
    Include,
    /// The candidate is rejected.
    Exclude,
    /// No rule speaks to this candidate; the walk falls back to its
    /// inherited `want` state.
    DontKnow,
}

/// Rejected filter configurations, reported at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Include and exclude rules were both declared for one kind.
    #[error("cannot use both include and exclude for '{0}'")]
    IncludeExcludeConflict(String),
    /// Inverting exclude rules would double-negate them.
    #[error("invert has no meaning combined with exclude conditions")]
    InvertWithExclude,
}

#[derive(Debug, Clone)]
struct Rule {
    kind: FilterKind,
    include: bool,
    literal: String,
}

/// An immutable-once-built set of match rules.
///
/// # Examples
///
/// ```
/// use fdtregion::{FilterKind, FilterSet};
///
/// let mut filters = FilterSet::new();
/// filters.include(FilterKind::COMPAT, "vendor,uart")?;
/// filters.include(FilterKind::PROP, "reg")?;
/// # Ok::<(), fdtregion::FilterError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FilterSet {
    rules: Vec<Rule>,
    types_inc: FilterKind,
    types_exc: FilterKind,
    invert: bool,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterSet {
    /// An empty set; every candidate classifies as [`Decision::DontKnow`].
    #[must_use]
    pub fn new() -> Self {
        FilterSet {
            rules: Vec::new(),
            types_inc: FilterKind::empty(),
            types_exc: FilterKind::empty(),
            invert: false,
        }
    }

    /// Adds an include rule for `kind`.
    pub fn include(
        &mut self,
        kind: FilterKind,
        literal: impl Into<String>,
    ) -> Result<&mut Self, FilterError> {
        self.add(kind, true, literal.into())
    }

    /// Adds an exclude rule for `kind`.
    pub fn exclude(
        &mut self,
        kind: FilterKind,
        literal: impl Into<String>,
    ) -> Result<&mut Self, FilterError> {
        self.add(kind, false, literal.into())
    }

    /// Flips `Include` and `Exclude` verdicts. `DontKnow` is never flipped.
    pub fn invert(&mut self) -> Result<&mut Self, FilterError> {
        if !self.types_exc.is_empty() {
            return Err(FilterError::InvertWithExclude);
        }
        self.invert = true;
        Ok(self)
    }

    fn add(
        &mut self,
        kind: FilterKind,
        include: bool,
        literal: String,
    ) -> Result<&mut Self, FilterError> {
        let (mine, other) = if include {
            (&mut self.types_inc, self.types_exc)
        } else {
            if self.invert {
                return Err(FilterError::InvertWithExclude);
            }
            (&mut self.types_exc, self.types_inc)
        };
        if other.intersects(kind) {
            return Err(FilterError::IncludeExcludeConflict(literal));
        }
        *mine |= kind;
        self.rules.push(Rule {
            kind,
            include,
            literal,
        });
        Ok(self)
    }

    /// The core decision table.
    ///
    /// Include rules win on the first literal match. When exclude rules are
    /// active for `kind` and none of their literals matched, everything
    /// unmentioned is included. A kind no rule covers is `DontKnow`. The two
    /// node carve-outs defer to the compatible fallback when the only rules
    /// in play are `ANY`-kind, so `-g` literals can still select nodes by
    /// their compatible strings.
    fn check_kind(&self, kind: FilterKind, list: Option<&[u8]>) -> Decision {
        if !(self.types_inc | self.types_exc).intersects(kind) {
            return Decision::DontKnow;
        }

        let mut none_match = FilterKind::ANY;
        for rule in &self.rules {
            if !rule.kind.intersects(kind) {
                continue;
            }
            let matched = list.is_some_and(|list| stringlist_contains(list, &rule.literal));
            if matched {
                if rule.include {
                    return Decision::Include;
                }
                none_match &= !rule.kind;
            }
        }

        if self.types_exc.intersects(kind) && none_match.intersects(kind) {
            if kind == FilterKind::NODE && self.types_exc == FilterKind::ANY {
                return Decision::DontKnow;
            }
            return Decision::Include;
        }
        if kind == FilterKind::NODE && self.types_inc == FilterKind::ANY {
            return Decision::DontKnow;
        }

        Decision::Exclude
    }

    fn apply_invert(&self, decision: Decision) -> Decision {
        match decision {
            _ if !self.invert => decision,
            Decision::Include => Decision::Exclude,
            Decision::Exclude => Decision::Include,
            Decision::DontKnow => Decision::DontKnow,
        }
    }
}

/// The decision points the region walk consults.
///
/// Implemented by [`FilterSet`]; custom implementations can select by
/// anything visible through the blob (`offset` is the candidate's own
/// structure-block offset).
pub trait Predicate {
    /// Classifies the node whose `BeginNode` tag is at `offset`. `path` is
    /// the full slash-joined path, `/` for the root.
    fn node(&self, fdt: &Fdt<'_>, offset: usize, path: &str) -> Decision;

    /// Classifies the property named `name` at `offset`.
    fn prop(&self, fdt: &Fdt<'_>, offset: usize, name: &str) -> Decision;
}

impl Predicate for FilterSet {
    fn node(&self, fdt: &Fdt<'_>, offset: usize, path: &str) -> Decision {
        let mut decision = self.check_kind(FilterKind::NODE, Some(path.as_bytes()));
        // The path told us nothing; let the compatible string decide.
        if decision == Decision::DontKnow {
            decision = self.check_kind(FilterKind::COMPAT, fdt.property(offset, "compatible"));
        }
        self.apply_invert(decision)
    }

    fn prop(&self, _fdt: &Fdt<'_>, _offset: usize, name: &str) -> Decision {
        self.apply_invert(self.check_kind(FilterKind::PROP, Some(name.as_bytes())))
    }
}
