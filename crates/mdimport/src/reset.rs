//! Reset semantics: rewind-to-offset and full rewind on a live cursor.
//!
//! The first type's member enumeration is drained once, repositioned to one
//! item before its end and drained again, then fully rewound and drained a
//! third time. All three drains go through the same handle. Whether the
//! replays are right is decided by comparing the concatenation between the
//! two implementations; [`ResetReport::check_invariants`] offers the direct
//! check as well.

use tracing::debug;

use crate::driver::Enumerator;
use crate::error::{HarnessError, Result};
use crate::import::{EnumQuery, Flavor, MetadataImport};
use crate::token::Token;

/// The three drains of one reset exercise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Type whose members were enumerated; `None` when there are no types.
    pub scope: Option<Token>,
    /// First full drain.
    pub first: Vec<Token>,
    /// Total reported after the first drain.
    pub count: u32,
    /// Drain after `reset(count - 1)`.
    pub after_tail_reset: Vec<Token>,
    /// Drain after `reset(0)`.
    pub after_full_reset: Vec<Token>,
}

impl ResetReport {
    /// All three drains, concatenated in order.
    pub fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(
            self.first.len() + self.after_tail_reset.len() + self.after_full_reset.len(),
        );
        tokens.extend_from_slice(&self.first);
        tokens.extend_from_slice(&self.after_tail_reset);
        tokens.extend_from_slice(&self.after_full_reset);
        tokens
    }

    /// The tail reset yields exactly the last item and the full reset
    /// replays the first drain.
    pub fn check_invariants(&self, flavor: Flavor) -> Result<()> {
        if self.count == 0 {
            return Ok(());
        }
        let inconsistent = |detail: String| HarnessError::ResetInconsistent { flavor, detail };

        let last = self.first.last().copied();
        if self.after_tail_reset.len() != 1 || self.after_tail_reset.first().copied() != last {
            return Err(inconsistent(format!(
                "reset({}) yielded {:?}, expected [{}]",
                self.count - 1,
                self.after_tail_reset,
                last.map_or_else(|| "<none>".to_string(), |t| t.to_string()),
            )));
        }
        if self.after_full_reset != self.first {
            return Err(inconsistent(format!(
                "reset(0) replayed {} items, first drain had {}",
                self.after_full_reset.len(),
                self.first.len()
            )));
        }
        Ok(())
    }
}

/// Exercise reset on the member enumeration of the first type definition.
pub fn exercise_reset<I: MetadataImport + ?Sized>(driver: &Enumerator<'_, I>) -> Result<ResetReport> {
    let types = driver.collect(EnumQuery::TypeDefs)?;
    let Some(&scope) = types.first() else {
        return Ok(ResetReport::default());
    };

    let mut report = ResetReport {
        scope: Some(scope),
        ..ResetReport::default()
    };
    let mut cursor = driver.cursor(EnumQuery::Members(scope));
    cursor.drain_into(&mut report.first, driver.capacity())?;
    report.count = cursor.count()?;

    if report.count != 0 {
        cursor.reset(report.count - 1)?;
        cursor.drain_into(&mut report.after_tail_reset, driver.capacity())?;

        cursor.reset(0)?;
        cursor.drain_into(&mut report.after_full_reset, driver.capacity())?;
    }
    cursor.close();

    debug!(
        scope = %scope,
        count = report.count,
        tail = report.after_tail_reset.len(),
        replay = report.after_full_reset.len(),
        "reset exercised"
    );
    Ok(report)
}
