//! Opening one session per implementation over the same image.

use tracing::debug;

use crate::error::Result;
use crate::import::{Dispenser, Flavor, MetadataImport};

/// Holds the two dispensers for a run.
///
/// Built once per run and passed by reference; any loaded native modules
/// are owned by the caller and outlive the loader.
#[derive(Clone, Copy)]
pub struct DualLoader<'d> {
    baseline: &'d dyn Dispenser,
    current: &'d dyn Dispenser,
}

impl<'d> DualLoader<'d> {
    pub fn new(baseline: &'d dyn Dispenser, current: &'d dyn Dispenser) -> Self {
        Self { baseline, current }
    }

    pub fn dispenser(&self, flavor: Flavor) -> &'d dyn Dispenser {
        match flavor {
            Flavor::Baseline => self.baseline,
            Flavor::Current => self.current,
        }
    }

    /// Open a read-only session on each implementation over `image`.
    ///
    /// If the current side fails to open, the baseline session is dropped
    /// (and released) before the error is returned.
    pub fn open<'img>(&self, image: &'img [u8]) -> Result<SessionPair<'img>> {
        let baseline = self.baseline.open_scope(image)?;
        let current = self.current.open_scope(image)?;
        debug!(bytes = image.len(), "sessions opened");
        Ok(SessionPair { baseline, current })
    }
}

/// Baseline and current sessions over the same image bytes.
pub struct SessionPair<'img> {
    baseline: Box<dyn MetadataImport + 'img>,
    current: Box<dyn MetadataImport + 'img>,
}

impl<'img> SessionPair<'img> {
    /// Pair two already opened sessions.
    pub fn new(
        baseline: Box<dyn MetadataImport + 'img>,
        current: Box<dyn MetadataImport + 'img>,
    ) -> Self {
        Self { baseline, current }
    }

    pub fn session(&self, flavor: Flavor) -> &(dyn MetadataImport + 'img) {
        match flavor {
            Flavor::Baseline => self.baseline.as_ref(),
            Flavor::Current => self.current.as_ref(),
        }
    }

    pub fn baseline(&self) -> &(dyn MetadataImport + 'img) {
        self.session(Flavor::Baseline)
    }

    pub fn current(&self) -> &(dyn MetadataImport + 'img) {
        self.session(Flavor::Current)
    }
}
