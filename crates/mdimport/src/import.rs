//! The capability boundary consumed from a metadata import implementation.
//!
//! [`MetadataImport`] exposes exactly the read-side operations the drivers
//! need: paging enumerations, counting, resetting, closing and signature
//! lookup. [`Dispenser`] opens one read-only session over an image. Baseline
//! and current implementations both satisfy these traits and are chosen when
//! the session is opened, never by runtime interface queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::token::{Status, Token};

/// Opaque native enumeration handle.
///
/// [`RawEnum::UNOPENED`] is the "no cursor yet" sentinel: the native
/// enumerator is created lazily by the first page call and written back
/// through the `&mut RawEnum` argument of [`MetadataImport::enum_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawEnum(usize);

impl RawEnum {
    pub const UNOPENED: Self = Self(0);

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub const fn is_opened(self) -> bool {
        self.0 != 0
    }
}

/// Kind of enumeration, without its scope token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumKind {
    TypeDefs,
    TypeRefs,
    TypeSpecs,
    ModuleRefs,
    Signatures,
    UserStrings,
    InterfaceImpls,
    Methods,
    Fields,
    Params,
    Members,
    Properties,
    Events,
}

impl EnumKind {
    /// Name of the native enumerator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TypeDefs => "EnumTypeDefs",
            Self::TypeRefs => "EnumTypeRefs",
            Self::TypeSpecs => "EnumTypeSpecs",
            Self::ModuleRefs => "EnumModuleRefs",
            Self::Signatures => "EnumSignatures",
            Self::UserStrings => "EnumUserStrings",
            Self::InterfaceImpls => "EnumInterfaceImpls",
            Self::Methods => "EnumMethods",
            Self::Fields => "EnumFields",
            Self::Params => "EnumParams",
            Self::Members => "EnumMembers",
            Self::Properties => "EnumProperties",
            Self::Events => "EnumEvents",
        }
    }
}

impl fmt::Display for EnumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enumeration request: a kind plus, for scoped kinds, the parent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumQuery {
    TypeDefs,
    TypeRefs,
    TypeSpecs,
    ModuleRefs,
    Signatures,
    UserStrings,
    /// Interface implementations of a type definition.
    InterfaceImpls(Token),
    /// Methods of a type definition.
    Methods(Token),
    /// Fields of a type definition.
    Fields(Token),
    /// Parameters of a method definition.
    Params(Token),
    /// Methods followed by fields of a type definition.
    Members(Token),
    Properties(Token),
    Events(Token),
}

impl EnumQuery {
    pub const fn kind(self) -> EnumKind {
        match self {
            Self::TypeDefs => EnumKind::TypeDefs,
            Self::TypeRefs => EnumKind::TypeRefs,
            Self::TypeSpecs => EnumKind::TypeSpecs,
            Self::ModuleRefs => EnumKind::ModuleRefs,
            Self::Signatures => EnumKind::Signatures,
            Self::UserStrings => EnumKind::UserStrings,
            Self::InterfaceImpls(_) => EnumKind::InterfaceImpls,
            Self::Methods(_) => EnumKind::Methods,
            Self::Fields(_) => EnumKind::Fields,
            Self::Params(_) => EnumKind::Params,
            Self::Members(_) => EnumKind::Members,
            Self::Properties(_) => EnumKind::Properties,
            Self::Events(_) => EnumKind::Events,
        }
    }

    /// Parent token for scoped enumerations.
    pub const fn scope(self) -> Option<Token> {
        match self {
            Self::InterfaceImpls(scope)
            | Self::Methods(scope)
            | Self::Fields(scope)
            | Self::Params(scope)
            | Self::Members(scope)
            | Self::Properties(scope)
            | Self::Events(scope) => Some(scope),
            Self::TypeDefs
            | Self::TypeRefs
            | Self::TypeSpecs
            | Self::ModuleRefs
            | Self::Signatures
            | Self::UserStrings => None,
        }
    }
}

impl fmt::Display for EnumQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope() {
            Some(scope) => write!(f, "{}({scope})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

/// Which build of the native component a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Baseline,
    Current,
}

impl Flavor {
    pub const ALL: [Self; 2] = [Self::Baseline, Self::Current];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Current => "current",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only import session over one metadata image.
///
/// Implementations are driven strictly sequentially; a handle is only ever
/// used by the cursor that created it.
pub trait MetadataImport {
    /// Fill `buffer` with the next page of `query`.
    ///
    /// An unopened `handle` begins the enumeration; the implementation writes
    /// the new handle back even when the call fails. Returns the number of
    /// items written, `0` meaning the enumeration is exhausted.
    fn enum_page(
        &self,
        handle: &mut RawEnum,
        query: EnumQuery,
        buffer: &mut [Token],
    ) -> Result<usize, Status>;

    /// Total number of items the enumeration yields over its whole lifetime.
    fn count_enum(&self, handle: RawEnum) -> Result<u32, Status>;

    /// Reposition so the next page starts `position` items from the start.
    fn reset_enum(&self, handle: RawEnum, position: u32) -> Result<(), Status>;

    /// Release an opened handle.
    fn close_enum(&self, handle: RawEnum);

    /// Signature blob for a signature, method, field or type-spec token.
    ///
    /// The returned bytes belong to the session.
    fn sig_from_token(&self, token: Token) -> Result<&[u8], Status>;
}

/// Factory capability that opens read-only sessions.
pub trait Dispenser {
    /// Which implementation this dispenser belongs to.
    fn flavor(&self) -> Flavor;

    /// Open a read-only session over `image`. The session borrows the bytes
    /// for its whole life.
    fn open_scope<'img>(
        &self,
        image: &'img [u8],
    ) -> Result<Box<dyn MetadataImport + 'img>, HarnessError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::table;

    #[test]
    fn raw_enum_sentinel() {
        assert!(!RawEnum::UNOPENED.is_opened());
        assert!(!RawEnum::default().is_opened());
        assert!(RawEnum::from_raw(0x1000).is_opened());
        assert_eq!(RawEnum::from_raw(0x1000).as_raw(), 0x1000);
    }

    #[test]
    fn query_scope_and_kind() {
        let ty = Token::from_parts(table::TYPE_DEF, 2);
        assert_eq!(EnumQuery::Members(ty).scope(), Some(ty));
        assert_eq!(EnumQuery::Members(ty).kind(), EnumKind::Members);
        assert_eq!(EnumQuery::TypeSpecs.scope(), None);
    }

    #[test]
    fn query_display() {
        let method = Token::from_parts(table::METHOD_DEF, 7);
        assert_eq!(EnumQuery::Params(method).to_string(), "EnumParams(0x06000007)");
        assert_eq!(EnumQuery::ModuleRefs.to_string(), "EnumModuleRefs");
    }

    #[test]
    fn flavor_names() {
        assert_eq!(Flavor::Baseline.to_string(), "baseline");
        assert_eq!(Flavor::ALL, [Flavor::Baseline, Flavor::Current]);
    }
}
