//! EnumCursor - owned enumeration handle
//!
//! Wraps the opaque handle returned by a paging enumerator and owns its
//! lifecycle: open → page → count/reset → close. The handle starts in the
//! unopened state and is created by the first page call. Count and reset on
//! an unopened cursor never reach the native layer.
//!
//! [`EnumCursor::close`] consumes the cursor, and `Drop` closes any handle
//! still open on an early return, so each opened handle is released exactly
//! once on every control path.

use tracing::trace;

use crate::error::{HarnessError, Result};
use crate::import::{EnumQuery, MetadataImport, RawEnum};
use crate::token::Token;

/// Cursor over one enumeration of one session.
pub struct EnumCursor<'s, I: MetadataImport + ?Sized> {
    import: &'s I,
    query: EnumQuery,
    raw: RawEnum,
}

impl<'s, I: MetadataImport + ?Sized> EnumCursor<'s, I> {
    /// Create a cursor in the unopened state.
    pub const fn open(import: &'s I, query: EnumQuery) -> Self {
        Self {
            import,
            query,
            raw: RawEnum::UNOPENED,
        }
    }

    pub const fn query(&self) -> EnumQuery {
        self.query
    }

    /// Whether the native enumerator has been created.
    pub const fn is_opened(&self) -> bool {
        self.raw.is_opened()
    }

    /// Fetch the next page into `buffer`, returning the filled prefix.
    ///
    /// An empty slice means the enumeration is exhausted.
    pub fn page<'b>(&mut self, buffer: &'b mut [Token]) -> Result<&'b [Token]> {
        let capacity = buffer.len();
        let returned = self
            .import
            .enum_page(&mut self.raw, self.query, buffer)
            .map_err(|status| HarnessError::PagingFailure {
                query: self.query,
                status,
            })?;
        if returned > capacity {
            return Err(HarnessError::PageOverrun {
                query: self.query,
                returned,
                capacity,
            });
        }
        trace!(query = %self.query, returned, "page");
        Ok(&buffer[..returned])
    }

    /// Page until exhaustion, appending every item to `out` in order.
    ///
    /// Returns the number of items appended.
    pub fn drain_into(&mut self, out: &mut Vec<Token>, capacity: usize) -> Result<usize> {
        let mut buffer = vec![Token::NIL; capacity.max(1)];
        let start = out.len();
        loop {
            let page = self.page(&mut buffer)?;
            if page.is_empty() {
                break;
            }
            out.extend_from_slice(page);
        }
        Ok(out.len() - start)
    }

    /// Total items over the enumeration's lifetime, independent of paging
    /// progress. An unopened cursor counts zero.
    pub fn count(&self) -> Result<u32> {
        if !self.raw.is_opened() {
            return Ok(0);
        }
        self.import
            .count_enum(self.raw)
            .map_err(|status| HarnessError::CountFailure {
                query: self.query,
                status,
            })
    }

    /// Reposition so the next page resumes `offset` items from the start.
    /// `0` rewinds fully; an unopened cursor has nothing to reposition.
    pub fn reset(&mut self, offset: u32) -> Result<()> {
        if !self.raw.is_opened() {
            return Ok(());
        }
        self.import
            .reset_enum(self.raw, offset)
            .map_err(|status| HarnessError::ResetFailure {
                query: self.query,
                offset,
                status,
            })
    }

    /// Release the native handle.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.raw.is_opened() {
            let raw = std::mem::replace(&mut self.raw, RawEnum::UNOPENED);
            trace!(query = %self.query, "close");
            self.import.close_enum(raw);
        }
    }
}

impl<I: MetadataImport + ?Sized> Drop for EnumCursor<'_, I> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultPlan, MemoryImport, MetadataModel};
    use crate::token::Status;
    use crate::import::EnumKind;

    fn import_with_types(n: usize) -> MemoryImport {
        MemoryImport::new(MetadataModel::synthetic(n, 0, 0, 0))
    }

    #[test]
    fn test_unopened_cursor_counts_zero_without_native_call() {
        let import = import_with_types(3);
        let cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        assert!(!cursor.is_opened());
        assert_eq!(cursor.count().unwrap(), 0);
        cursor.close();
        assert_eq!(import.stats().opened, 0);
        assert_eq!(import.stats().closed, 0);
    }

    #[test]
    fn test_first_page_opens_handle() {
        let import = import_with_types(3);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut buffer = [Token::NIL; 2];
        let page = cursor.page(&mut buffer).unwrap();
        assert_eq!(page.len(), 2);
        assert!(cursor.is_opened());
        assert_eq!(cursor.count().unwrap(), 3);
    }

    #[test]
    fn test_drain_collects_all_pages_in_order() {
        let import = import_with_types(5);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut out = Vec::new();
        let added = cursor.drain_into(&mut out, 2).unwrap();
        assert_eq!(added, 5);
        let rids: Vec<u32> = out.iter().map(|t| t.rid()).collect();
        assert_eq!(rids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_drop_closes_exactly_once() {
        let import = import_with_types(1);
        {
            let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
            let mut out = Vec::new();
            cursor.drain_into(&mut out, 4).unwrap();
        }
        let stats = import.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.double_closes, 0);
    }

    #[test]
    fn test_paging_failure_still_closes() {
        let faults = FaultPlan {
            paging: Some((EnumKind::TypeDefs, Status::E_FAIL)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(2, 0, 0, 0), faults);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut out = Vec::new();
        let err = cursor.drain_into(&mut out, 4).unwrap_err();
        assert!(matches!(err, HarnessError::PagingFailure { status, .. } if status == Status::E_FAIL));
        drop(cursor);
        let stats = import.stats();
        assert_eq!(stats.opened, stats.closed);
    }

    #[test]
    fn test_page_overrun_detected() {
        let faults = FaultPlan {
            page_overrun: Some(EnumKind::TypeDefs),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(MetadataModel::synthetic(4, 0, 0, 0), faults);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut buffer = [Token::NIL; 2];
        let err = cursor.page(&mut buffer).unwrap_err();
        assert!(matches!(err, HarnessError::PageOverrun { returned: 3, capacity: 2, .. }));
    }

    #[test]
    fn test_reset_rewinds() {
        let import = import_with_types(4);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut first = Vec::new();
        cursor.drain_into(&mut first, 3).unwrap();

        cursor.reset(3).unwrap();
        let mut tail = Vec::new();
        cursor.drain_into(&mut tail, 3).unwrap();
        assert_eq!(tail, vec![first[3]]);

        cursor.reset(0).unwrap();
        let mut replay = Vec::new();
        cursor.drain_into(&mut replay, 3).unwrap();
        assert_eq!(replay, first);
    }

    #[test]
    fn test_reset_on_unopened_is_noop() {
        let import = import_with_types(2);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        cursor.reset(0).unwrap();
        assert!(!cursor.is_opened());
    }
}
