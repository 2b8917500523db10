//! Named correctness scenarios.
//!
//! Each scenario is one driver invocation against one session. The runner
//! executes it once per implementation and compares the two outputs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::compare::{CompareResult, SequenceComparator};
use crate::driver::{Enumerator, PROPERTIES_EVENTS};
use crate::error::Result;
use crate::import::{EnumQuery, Flavor, MetadataImport};
use crate::reset::exercise_reset;
use crate::signature::{SignatureBlob, SignatureRecord, copy_signature_blobs, resolve_signatures};
use crate::token::Token;

/// A correctness scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Flat type definitions.
    TypeDefs,
    /// Flat type references.
    TypeRefs,
    /// Flat type specifications.
    TypeSpecs,
    /// Flat module references.
    ModuleRefs,
    /// types → interface impls, methods → params, fields
    TypeHierarchy,
    /// types → members
    Members,
    /// Rewind-to-offset and full rewind on the first type's members.
    ResetEnum,
    /// Flat standalone signatures.
    Signatures,
    /// Length of every standalone signature's blob.
    SigFromToken,
    /// Flat user strings.
    UserStrings,
    /// types → properties, events
    PropertiesEvents,
    /// Bytes of every standalone signature's blob.
    SignatureBlobs,
}

impl Scenario {
    /// Every scenario, in execution order.
    pub const ALL: [Self; 12] = [
        Self::TypeDefs,
        Self::TypeRefs,
        Self::TypeSpecs,
        Self::ModuleRefs,
        Self::TypeHierarchy,
        Self::Members,
        Self::ResetEnum,
        Self::Signatures,
        Self::SigFromToken,
        Self::UserStrings,
        Self::PropertiesEvents,
        Self::SignatureBlobs,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::TypeDefs => "type_defs",
            Self::TypeRefs => "type_refs",
            Self::TypeSpecs => "type_specs",
            Self::ModuleRefs => "module_refs",
            Self::TypeHierarchy => "type_hierarchy",
            Self::Members => "members",
            Self::ResetEnum => "reset_enum",
            Self::Signatures => "signatures",
            Self::SigFromToken => "sig_from_token",
            Self::UserStrings => "user_strings",
            Self::PropertiesEvents => "properties_events",
            Self::SignatureBlobs => "signature_blobs",
        }
    }

    /// Drive this scenario against one session.
    ///
    /// With `strict_reset`, [`Scenario::ResetEnum`] also checks the replay
    /// properties on this side alone.
    pub fn run<I: MetadataImport + ?Sized>(
        self,
        driver: &Enumerator<'_, I>,
        flavor: Flavor,
        strict_reset: bool,
    ) -> Result<ScenarioOutput> {
        let output = match self {
            Self::TypeDefs => ScenarioOutput::Tokens(driver.collect(EnumQuery::TypeDefs)?),
            Self::TypeRefs => ScenarioOutput::Tokens(driver.collect(EnumQuery::TypeRefs)?),
            Self::TypeSpecs => ScenarioOutput::Tokens(driver.collect(EnumQuery::TypeSpecs)?),
            Self::ModuleRefs => ScenarioOutput::Tokens(driver.collect(EnumQuery::ModuleRefs)?),
            Self::Signatures => ScenarioOutput::Tokens(driver.collect(EnumQuery::Signatures)?),
            Self::UserStrings => ScenarioOutput::Tokens(driver.collect(EnumQuery::UserStrings)?),
            Self::TypeHierarchy => ScenarioOutput::Tokens(driver.type_hierarchy()?),
            Self::Members => ScenarioOutput::Tokens(driver.members()?),
            Self::PropertiesEvents => {
                ScenarioOutput::Tokens(driver.compose(EnumQuery::TypeDefs, PROPERTIES_EVENTS)?)
            }
            Self::ResetEnum => {
                let report = exercise_reset(driver)?;
                if strict_reset {
                    report.check_invariants(flavor)?;
                }
                ScenarioOutput::Tokens(report.tokens())
            }
            Self::SigFromToken => ScenarioOutput::Signatures(resolve_signatures(driver)?),
            Self::SignatureBlobs => ScenarioOutput::Blobs(copy_signature_blobs(driver)?),
        };
        debug!(scenario = self.name(), %flavor, items = output.len(), "scenario driven");
        Ok(output)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = ParseScenarioError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| ParseScenarioError(s.to_string()))
    }
}

/// Error returned when parsing an unknown scenario name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown scenario: {0:?}")]
pub struct ParseScenarioError(pub String);

/// What one side produced for a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutput {
    Tokens(Vec<Token>),
    Signatures(Vec<SignatureRecord>),
    Blobs(Vec<SignatureBlob>),
}

impl ScenarioOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Tokens(items) => items.len(),
            Self::Signatures(items) => items.len(),
            Self::Blobs(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element-wise listing, used when the two sides are of different shapes.
    fn listing(&self) -> Vec<String> {
        match self {
            Self::Tokens(items) => items.iter().map(ToString::to_string).collect(),
            Self::Signatures(items) => items.iter().map(ToString::to_string).collect(),
            Self::Blobs(items) => items.iter().map(ToString::to_string).collect(),
        }
    }

    /// Compare a baseline output with a current output.
    pub fn compare(
        comparator: &SequenceComparator,
        scenario: Scenario,
        baseline: &Self,
        current: &Self,
    ) -> CompareResult {
        let name = scenario.name();
        match (baseline, current) {
            (Self::Tokens(b), Self::Tokens(c)) => comparator.compare(name, b, c),
            (Self::Signatures(b), Self::Signatures(c)) => comparator.compare(name, b, c),
            (Self::Blobs(b), Self::Blobs(c)) => comparator.compare(name, b, c),
            _ => comparator.compare(name, &baseline.listing(), &current.listing()),
        }
    }
}
