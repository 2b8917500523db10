//! Metadata tokens and native status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Table kinds carried in the high byte of a [`Token`].
pub mod table {
    pub const MODULE: u8 = 0x00;
    pub const TYPE_REF: u8 = 0x01;
    pub const TYPE_DEF: u8 = 0x02;
    pub const FIELD_DEF: u8 = 0x04;
    pub const METHOD_DEF: u8 = 0x06;
    pub const PARAM_DEF: u8 = 0x08;
    pub const INTERFACE_IMPL: u8 = 0x09;
    pub const MEMBER_REF: u8 = 0x0a;
    pub const SIGNATURE: u8 = 0x11;
    pub const EVENT: u8 = 0x14;
    pub const PROPERTY: u8 = 0x17;
    pub const MODULE_REF: u8 = 0x1a;
    pub const TYPE_SPEC: u8 = 0x1b;
    pub const USER_STRING: u8 = 0x70;
}

/// Opaque 32-bit identifier of one metadata element.
///
/// The engine never interprets a token beyond equality and its position in
/// a produced sequence; [`Token::table`] and [`Token::rid`] exist for display
/// and for building fixtures.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u32);

impl Token {
    /// The nil token (table 0, row 0).
    pub const NIL: Self = Self(0);

    /// Wrap a raw token value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Build a token from a table kind and a 1-based row id.
    pub const fn from_parts(table: u8, rid: u32) -> Self {
        Self(((table as u32) << 24) | (rid & 0x00FF_FFFF))
    }

    /// Raw 32-bit value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Table kind (high byte).
    pub const fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Row id (low 24 bits).
    pub const fn rid(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub const fn is_nil(self) -> bool {
        self.rid() == 0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(0x{:08x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for Token {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

/// Status code returned by a native call (`HRESULT` convention).
///
/// Negative values are failures; zero and positive values (such as
/// `S_FALSE`) are success.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

#[allow(clippy::cast_possible_wrap)]
impl Status {
    pub const OK: Self = Self(0);
    pub const FALSE: Self = Self(1);
    pub const E_FAIL: Self = Self(0x8000_4005_u32 as i32);
    pub const E_POINTER: Self = Self(0x8000_4003_u32 as i32);
    pub const E_INVALIDARG: Self = Self(0x8007_0057_u32 as i32);
    pub const CLDB_E_RECORD_NOTFOUND: Self = Self(0x8013_1130_u32 as i32);

    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    pub const fn is_success(self) -> bool {
        !self.is_failure()
    }

    /// `Ok(())` for success codes, `Err(self)` for failures.
    pub const fn into_result(self) -> Result<(), Self> {
        if self.is_failure() { Err(self) } else { Ok(()) }
    }
}

#[allow(clippy::cast_sign_loss)]
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}
