//! Signature token resolution.

use std::fmt;

use serde::Serialize;

use crate::driver::Enumerator;
use crate::error::{HarnessError, Result};
use crate::import::{EnumQuery, MetadataImport};
use crate::token::{Status, Token};

/// Result of one signature lookup.
///
/// The address points into implementation-private memory and differs
/// between any two implementations, so equality compares the length only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignatureRecord {
    pub address: usize,
    pub len: u32,
}

impl PartialEq for SignatureRecord {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
    }
}

impl Eq for SignatureRecord {}

impl fmt::Display for SignatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "len={}", self.len)
    }
}

/// A signature blob copied out of the session, compared byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureBlob {
    pub token: Token,
    pub bytes: Vec<u8>,
}

impl fmt::Display for SignatureBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.token)?;
        for byte in &self.bytes {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

/// Resolve every standalone signature token to `(address, length)`.
pub fn resolve_signatures<I: MetadataImport + ?Sized>(
    driver: &Enumerator<'_, I>,
) -> Result<Vec<SignatureRecord>> {
    driver
        .collect(EnumQuery::Signatures)?
        .into_iter()
        .map(|token| {
            let blob = lookup(driver.import(), token)?;
            Ok(SignatureRecord {
                address: blob.as_ptr() as usize,
                len: blob_len(token, blob.len())?,
            })
        })
        .collect()
}

/// Resolve every standalone signature token and copy its bytes.
pub fn copy_signature_blobs<I: MetadataImport + ?Sized>(
    driver: &Enumerator<'_, I>,
) -> Result<Vec<SignatureBlob>> {
    driver
        .collect(EnumQuery::Signatures)?
        .into_iter()
        .map(|token| {
            Ok(SignatureBlob {
                token,
                bytes: lookup(driver.import(), token)?.to_vec(),
            })
        })
        .collect()
}

/// A reported length must fit the native `ULONG` it came from.
fn blob_len(token: Token, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| HarnessError::LookupFailure {
        token,
        status: Status::E_INVALIDARG,
    })
}

fn lookup<I: MetadataImport + ?Sized>(import: &I, token: Token) -> Result<&[u8]> {
    import
        .sig_from_token(token)
        .map_err(|status| HarnessError::LookupFailure { token, status })
}
