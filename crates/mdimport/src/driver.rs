//! Flat and hierarchical enumeration drivers.
//!
//! [`Enumerator::collect`] is the flat driver: it pages one enumeration to
//! exhaustion and then checks the reported count against what it produced.
//! [`Enumerator::drain`] pages without that check.
//! [`Enumerator::compose`] builds nested walks out of that primitive, writing
//! each parent token followed by its children (and their children) in a fixed
//! category order.

use tracing::debug;

use crate::cursor::EnumCursor;
use crate::error::{HarnessError, Result};
use crate::import::{EnumQuery, MetadataImport};
use crate::token::Token;

/// Page size used when none is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16;

/// One child category beneath a parent token.
#[derive(Debug, Clone, Copy)]
pub struct ChildWalk {
    /// Builds the child enumeration for a parent token.
    pub query: fn(Token) -> EnumQuery,
    /// Categories walked beneath each child, immediately after it.
    pub nested: &'static [ChildWalk],
    /// Whether each child enumeration's reported count must match its drain.
    pub counted: bool,
}

impl ChildWalk {
    pub const fn leaf(query: fn(Token) -> EnumQuery) -> Self {
        Self::nested(query, &[])
    }

    pub const fn nested(query: fn(Token) -> EnumQuery, nested: &'static [Self]) -> Self {
        Self {
            query,
            nested,
            counted: true,
        }
    }

    /// Leaf whose enumerations are drained and closed without a count check.
    pub const fn uncounted(query: fn(Token) -> EnumQuery) -> Self {
        Self {
            query,
            nested: &[],
            counted: false,
        }
    }
}

const METHOD_PARAMS: &[ChildWalk] = &[ChildWalk::leaf(EnumQuery::Params)];

/// types → interface impls, methods → params, fields
pub const TYPE_HIERARCHY: &[ChildWalk] = &[
    ChildWalk::leaf(EnumQuery::InterfaceImpls),
    ChildWalk::nested(EnumQuery::Methods, METHOD_PARAMS),
    ChildWalk::leaf(EnumQuery::Fields),
];

/// types → members (member counts are not checked)
pub const MEMBERS: &[ChildWalk] = &[ChildWalk::uncounted(EnumQuery::Members)];

/// types → properties, events
pub const PROPERTIES_EVENTS: &[ChildWalk] = &[
    ChildWalk::leaf(EnumQuery::Properties),
    ChildWalk::leaf(EnumQuery::Events),
];

/// Driver bound to one session and one page size.
pub struct Enumerator<'s, I: MetadataImport + ?Sized> {
    import: &'s I,
    capacity: usize,
}

impl<I: MetadataImport + ?Sized> Clone for Enumerator<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: MetadataImport + ?Sized> Copy for Enumerator<'_, I> {}

impl<'s, I: MetadataImport + ?Sized> Enumerator<'s, I> {
    pub const fn new(import: &'s I) -> Self {
        Self::with_capacity(import, DEFAULT_BUFFER_CAPACITY)
    }

    /// Driver with a custom page size (at least one item).
    pub const fn with_capacity(import: &'s I, capacity: usize) -> Self {
        Self {
            import,
            capacity: if capacity == 0 { 1 } else { capacity },
        }
    }

    pub const fn import(&self) -> &'s I {
        self.import
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start a cursor for `query` on this driver's session.
    pub const fn cursor(&self, query: EnumQuery) -> EnumCursor<'s, I> {
        EnumCursor::open(self.import, query)
    }

    /// Drain `query` into one ordered sequence and validate its count.
    ///
    /// The handle is closed before the count check is reported, so a
    /// mismatch still leaves nothing open.
    pub fn collect(&self, query: EnumQuery) -> Result<Vec<Token>> {
        let mut cursor = self.cursor(query);
        let mut tokens = Vec::new();
        cursor.drain_into(&mut tokens, self.capacity)?;
        let reported = cursor.count()?;
        cursor.close();

        debug!(%query, produced = tokens.len(), reported, "collected");
        if usize::try_from(reported).ok() != Some(tokens.len()) {
            return Err(HarnessError::CountMismatch {
                query,
                reported,
                produced: tokens.len(),
            });
        }
        Ok(tokens)
    }

    /// Drain `query` into one ordered sequence without consulting its count.
    pub fn drain(&self, query: EnumQuery) -> Result<Vec<Token>> {
        let mut cursor = self.cursor(query);
        let mut tokens = Vec::new();
        cursor.drain_into(&mut tokens, self.capacity)?;
        cursor.close();

        debug!(%query, produced = tokens.len(), "drained");
        Ok(tokens)
    }

    /// Enumerate `top`, then walk `children` beneath every top-level token.
    ///
    /// Output per parent: `[parent, child₁ (and its nested walk)…, …]`.
    pub fn compose(&self, top: EnumQuery, children: &[ChildWalk]) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        for parent in self.collect(top)? {
            self.walk_into(parent, children, &mut out)?;
        }
        Ok(out)
    }

    /// types → interface impls, methods → params, fields
    pub fn type_hierarchy(&self) -> Result<Vec<Token>> {
        self.compose(EnumQuery::TypeDefs, TYPE_HIERARCHY)
    }

    /// types → members
    pub fn members(&self) -> Result<Vec<Token>> {
        self.compose(EnumQuery::TypeDefs, MEMBERS)
    }

    fn walk_into(&self, parent: Token, children: &[ChildWalk], out: &mut Vec<Token>) -> Result<()> {
        out.push(parent);
        for child in children {
            let query = (child.query)(parent);
            let tokens = if child.counted {
                self.collect(query)?
            } else {
                self.drain(query)?
            };
            for token in tokens {
                self.walk_into(token, child.nested, out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::EnumKind;
    use crate::memory::{FaultPlan, MemoryImport, MetadataModel};
    use crate::token::{Status, table};

    #[test]
    fn test_collect_empty_enumeration() {
        let import = MemoryImport::new(MetadataModel::default());
        let tokens = Enumerator::new(&import).collect(EnumQuery::TypeRefs).unwrap();
        assert!(tokens.is_empty());
        assert_eq!(import.stats().opened, import.stats().closed);
    }

    #[test]
    fn test_collect_spans_many_pages() {
        let import = MemoryImport::new(MetadataModel::synthetic(40, 0, 0, 0));
        let tokens = Enumerator::with_capacity(&import, 16)
            .collect(EnumQuery::TypeDefs)
            .unwrap();
        assert_eq!(tokens.len(), 40);
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let import = MemoryImport::new(MetadataModel::synthetic(3, 0, 0, 0));
        let driver = Enumerator::with_capacity(&import, 0);
        assert_eq!(driver.capacity(), 1);
        assert_eq!(driver.collect(EnumQuery::TypeDefs).unwrap().len(), 3);
    }

    #[test]
    fn test_count_mismatch_is_hard_failure_and_closes() {
        let faults = FaultPlan {
            count_skew: Some((EnumKind::TypeDefs, 1)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(3, 0, 0, 0), faults);
        let err = Enumerator::new(&import).collect(EnumQuery::TypeDefs).unwrap_err();
        assert_eq!(
            err,
            HarnessError::CountMismatch {
                query: EnumQuery::TypeDefs,
                reported: 4,
                produced: 3,
            }
        );
        assert_eq!(import.stats().opened, 1);
        assert_eq!(import.stats().closed, 1);
    }

    #[test]
    fn test_type_hierarchy_ordering() {
        let import = MemoryImport::new(MetadataModel::synthetic(2, 2, 1, 1));
        let tokens = Enumerator::new(&import).type_hierarchy().unwrap();
        let tables: Vec<u8> = tokens.iter().map(|t| t.table()).collect();
        assert_eq!(
            tables,
            vec![
                table::TYPE_DEF,
                table::METHOD_DEF,
                table::PARAM_DEF,
                table::METHOD_DEF,
                table::PARAM_DEF,
                table::FIELD_DEF,
                table::TYPE_DEF,
                table::METHOD_DEF,
                table::PARAM_DEF,
                table::METHOD_DEF,
                table::PARAM_DEF,
                table::FIELD_DEF,
            ]
        );
    }

    #[test]
    fn test_members_two_level() {
        let import = MemoryImport::new(MetadataModel::synthetic(2, 1, 0, 2));
        let tokens = Enumerator::new(&import).members().unwrap();
        // per type: [type, method, field, field]
        assert_eq!(tokens.len(), 8);
        assert_eq!(tokens[0].table(), table::TYPE_DEF);
        assert_eq!(tokens[1].table(), table::METHOD_DEF);
        assert_eq!(tokens[2].table(), table::FIELD_DEF);
        assert_eq!(tokens[4].table(), table::TYPE_DEF);
    }

    #[test]
    fn test_members_ignore_member_count() {
        let faults = FaultPlan {
            count_skew: Some((EnumKind::Members, 2)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(2, 1, 0, 2), faults);
        let tokens = Enumerator::new(&import).members().unwrap();
        assert_eq!(tokens.len(), 8);
        let stats = import.stats();
        assert_eq!(stats.opened, stats.closed);
    }

    #[test]
    fn test_hierarchy_children_are_counted() {
        let faults = FaultPlan {
            count_skew: Some((EnumKind::Fields, 1)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(1, 1, 0, 1), faults);
        let err = Enumerator::new(&import).type_hierarchy().unwrap_err();
        assert!(matches!(err, HarnessError::CountMismatch { query: EnumQuery::Fields(_), .. }));
    }

    #[test]
    fn test_child_failure_aborts_walk() {
        let faults = FaultPlan {
            paging: Some((EnumKind::Params, Status::E_FAIL)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(2, 1, 1, 0), faults);
        let err = Enumerator::new(&import).type_hierarchy().unwrap_err();
        assert!(matches!(err, HarnessError::PagingFailure { query: EnumQuery::Params(_), .. }));
        let stats = import.stats();
        assert_eq!(stats.opened, stats.closed);
    }
}
