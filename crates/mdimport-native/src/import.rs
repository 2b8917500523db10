//! `IMetaDataImport` vtable adapter.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::marker::PhantomData;
use std::sync::Arc;

use libloading::Library;
use mdimport::{EnumKind, EnumQuery, MetadataImport, RawEnum, Status, Token};

use crate::com::ComPtr;

/// `IMetaDataImport` vtable slots.
mod slot {
    pub const CLOSE_ENUM: usize = 3;
    pub const COUNT_ENUM: usize = 4;
    pub const RESET_ENUM: usize = 5;
    pub const ENUM_TYPE_DEFS: usize = 6;
    pub const ENUM_INTERFACE_IMPLS: usize = 7;
    pub const ENUM_TYPE_REFS: usize = 8;
    pub const ENUM_MEMBERS: usize = 16;
    pub const ENUM_METHODS: usize = 18;
    pub const ENUM_FIELDS: usize = 20;
    pub const ENUM_PARAMS: usize = 22;
    pub const ENUM_PROPERTIES: usize = 32;
    pub const ENUM_EVENTS: usize = 33;
    pub const GET_SIG_FROM_TOKEN: usize = 41;
    pub const ENUM_MODULE_REFS: usize = 43;
    pub const ENUM_SIGNATURES: usize = 49;
    pub const ENUM_TYPE_SPECS: usize = 50;
    pub const ENUM_USER_STRINGS: usize = 51;
}

type EnumFn = unsafe extern "system" fn(
    this: *mut c_void,
    enum_handle: *mut *mut c_void,
    tokens: *mut u32,
    max: u32,
    returned: *mut u32,
) -> i32;

type ScopedEnumFn = unsafe extern "system" fn(
    this: *mut c_void,
    enum_handle: *mut *mut c_void,
    scope: u32,
    tokens: *mut u32,
    max: u32,
    returned: *mut u32,
) -> i32;

type CloseEnumFn = unsafe extern "system" fn(this: *mut c_void, enum_handle: *mut c_void);

type CountEnumFn =
    unsafe extern "system" fn(this: *mut c_void, enum_handle: *mut c_void, count: *mut u32) -> i32;

type ResetEnumFn =
    unsafe extern "system" fn(this: *mut c_void, enum_handle: *mut c_void, position: u32) -> i32;

type GetSigFromTokenFn = unsafe extern "system" fn(
    this: *mut c_void,
    token: u32,
    sig: *mut *const u8,
    len: *mut u32,
) -> i32;

const fn enum_slot(kind: EnumKind) -> usize {
    match kind {
        EnumKind::TypeDefs => slot::ENUM_TYPE_DEFS,
        EnumKind::TypeRefs => slot::ENUM_TYPE_REFS,
        EnumKind::TypeSpecs => slot::ENUM_TYPE_SPECS,
        EnumKind::ModuleRefs => slot::ENUM_MODULE_REFS,
        EnumKind::Signatures => slot::ENUM_SIGNATURES,
        EnumKind::UserStrings => slot::ENUM_USER_STRINGS,
        EnumKind::InterfaceImpls => slot::ENUM_INTERFACE_IMPLS,
        EnumKind::Methods => slot::ENUM_METHODS,
        EnumKind::Fields => slot::ENUM_FIELDS,
        EnumKind::Params => slot::ENUM_PARAMS,
        EnumKind::Members => slot::ENUM_MEMBERS,
        EnumKind::Properties => slot::ENUM_PROPERTIES,
        EnumKind::Events => slot::ENUM_EVENTS,
    }
}

fn native_handle(handle: RawEnum) -> *mut c_void {
    std::ptr::with_exposed_provenance_mut(handle.as_raw())
}

/// A read-only import session backed by a native `IMetaDataImport`.
///
/// The session reads `'img` bytes in place. Fields drop in order, so the
/// interface is released before the library that implements it.
pub struct NativeImport<'img> {
    com: ComPtr,
    _library: Option<Arc<Library>>,
    _image: PhantomData<&'img [u8]>,
}

impl NativeImport<'_> {
    /// Wrap an `IMetaDataImport` reference.
    ///
    /// # Safety
    ///
    /// `com` must implement `IMetaDataImport`, must have been opened over
    /// memory that lives for `'img`, and `library` (if any) must be the
    /// module implementing it.
    pub(crate) unsafe fn new(com: ComPtr, library: Option<Arc<Library>>) -> Self {
        Self {
            com,
            _library: library,
            _image: PhantomData,
        }
    }
}

impl MetadataImport for NativeImport<'_> {
    fn enum_page(
        &self,
        handle: &mut RawEnum,
        query: EnumQuery,
        buffer: &mut [Token],
    ) -> Result<usize, Status> {
        let max = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let tokens = buffer.as_mut_ptr().cast::<u32>();
        let mut raw = native_handle(*handle);
        let mut returned = 0u32;
        let slot = enum_slot(query.kind());

        // SAFETY: `Token` is `repr(transparent)` over `u32`, `tokens` holds
        // `max` writable entries, and the slot signature matches the kind.
        let hr = unsafe {
            match query.scope() {
                None => {
                    let f: EnumFn = self.com.slot(slot);
                    f(self.com.as_raw(), &raw mut raw, tokens, max, &raw mut returned)
                }
                Some(scope) => {
                    let f: ScopedEnumFn = self.com.slot(slot);
                    f(
                        self.com.as_raw(),
                        &raw mut raw,
                        scope.raw(),
                        tokens,
                        max,
                        &raw mut returned,
                    )
                }
            }
        };
        // The handle is written back even on failure so it is still closed.
        *handle = RawEnum::from_raw(raw.expose_provenance());
        Status(hr).into_result()?;
        Ok(usize::try_from(returned).unwrap_or(usize::MAX))
    }

    fn count_enum(&self, handle: RawEnum) -> Result<u32, Status> {
        let mut count = 0u32;
        // SAFETY: slot 4 is CountEnum; `handle` is open.
        let hr = unsafe {
            let f: CountEnumFn = self.com.slot(slot::COUNT_ENUM);
            f(self.com.as_raw(), native_handle(handle), &raw mut count)
        };
        Status(hr).into_result().map(|()| count)
    }

    fn reset_enum(&self, handle: RawEnum, position: u32) -> Result<(), Status> {
        // SAFETY: slot 5 is ResetEnum; `handle` is open.
        let hr = unsafe {
            let f: ResetEnumFn = self.com.slot(slot::RESET_ENUM);
            f(self.com.as_raw(), native_handle(handle), position)
        };
        Status(hr).into_result()
    }

    fn close_enum(&self, handle: RawEnum) {
        // SAFETY: slot 3 is CloseEnum; the cursor closes each handle once.
        unsafe {
            let f: CloseEnumFn = self.com.slot(slot::CLOSE_ENUM);
            f(self.com.as_raw(), native_handle(handle));
        }
    }

    fn sig_from_token(&self, token: Token) -> Result<&[u8], Status> {
        let mut sig: *const u8 = std::ptr::null();
        let mut len = 0u32;
        // SAFETY: slot 41 is GetSigFromToken.
        let hr = unsafe {
            let f: GetSigFromTokenFn = self.com.slot(slot::GET_SIG_FROM_TOKEN);
            f(self.com.as_raw(), token.raw(), &raw mut sig, &raw mut len)
        };
        Status(hr).into_result()?;
        if sig.is_null() || len == 0 {
            return Ok(&[]);
        }
        let len = usize::try_from(len).map_err(|_| Status::E_FAIL)?;
        // SAFETY: the blob is owned by the session (or the image it reads)
        // and stays valid while `self` is borrowed.
        Ok(unsafe { std::slice::from_raw_parts(sig, len) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::fake::FakeObject;
    use mdimport::{EnumCursor, Enumerator, table};
    use std::cell::Cell;

    struct Scope {
        types: Vec<u32>,
        methods: Vec<u32>,
        sig: [u8; 3],
        closes: Cell<u32>,
        last_scope: Cell<u32>,
    }

    /// Position of an open fake enumeration, boxed behind the native handle.
    struct Position {
        items: Vec<u32>,
        next: usize,
    }

    type Fake = FakeObject<Scope>;

    unsafe fn fill(
        items: Vec<u32>,
        enum_handle: *mut *mut c_void,
        tokens: *mut u32,
        max: u32,
        returned: *mut u32,
    ) -> i32 {
        // SAFETY: test-only; pointers come from `NativeImport::enum_page`.
        unsafe {
            if (*enum_handle).is_null() {
                *enum_handle = Box::into_raw(Box::new(Position { items, next: 0 })).cast();
            }
            let position = &mut *(*enum_handle).cast::<Position>();
            let n = (position.items.len() - position.next).min(max as usize);
            for i in 0..n {
                *tokens.add(i) = position.items[position.next + i];
            }
            position.next += n;
            *returned = u32::try_from(n).unwrap();
        }
        0
    }

    unsafe extern "system" fn enum_type_defs(
        this: *mut c_void,
        enum_handle: *mut *mut c_void,
        tokens: *mut u32,
        max: u32,
        returned: *mut u32,
    ) -> i32 {
        // SAFETY: `this` is a live `Fake`.
        unsafe {
            let items = Fake::from_this(this).state.types.clone();
            fill(items, enum_handle, tokens, max, returned)
        }
    }

    unsafe extern "system" fn enum_methods(
        this: *mut c_void,
        enum_handle: *mut *mut c_void,
        scope: u32,
        tokens: *mut u32,
        max: u32,
        returned: *mut u32,
    ) -> i32 {
        // SAFETY: `this` is a live `Fake`.
        unsafe {
            let state = &Fake::from_this(this).state;
            state.last_scope.set(scope);
            fill(state.methods.clone(), enum_handle, tokens, max, returned)
        }
    }

    unsafe extern "system" fn enum_failing(
        _this: *mut c_void,
        enum_handle: *mut *mut c_void,
        _tokens: *mut u32,
        _max: u32,
        _returned: *mut u32,
    ) -> i32 {
        // SAFETY: the handle slot is writable.
        unsafe {
            *enum_handle = Box::into_raw(Box::new(Position { items: Vec::new(), next: 0 })).cast();
        }
        Status::E_FAIL.0
    }

    unsafe extern "system" fn count_enum(_this: *mut c_void, enum_handle: *mut c_void, count: *mut u32) -> i32 {
        // SAFETY: the handle was created by `fill`.
        unsafe {
            let position = &*enum_handle.cast::<Position>();
            *count = u32::try_from(position.items.len()).unwrap();
        }
        0
    }

    unsafe extern "system" fn reset_enum(_this: *mut c_void, enum_handle: *mut c_void, at: u32) -> i32 {
        // SAFETY: the handle was created by `fill`.
        unsafe {
            (*enum_handle.cast::<Position>()).next = at as usize;
        }
        0
    }

    unsafe extern "system" fn close_enum(this: *mut c_void, enum_handle: *mut c_void) {
        // SAFETY: the handle was created by `fill` and is closed once.
        unsafe {
            drop(Box::from_raw(enum_handle.cast::<Position>()));
            let closes = &Fake::from_this(this).state.closes;
            closes.set(closes.get() + 1);
        }
    }

    unsafe extern "system" fn get_sig(this: *mut c_void, _token: u32, sig: *mut *const u8, len: *mut u32) -> i32 {
        // SAFETY: `this` is a live `Fake`; out-pointers are writable.
        unsafe {
            let blob = &Fake::from_this(this).state.sig;
            *sig = blob.as_ptr();
            *len = 3;
        }
        0
    }

    fn fake(types: &[u32], type_refs_fail: bool) -> Box<Fake> {
        let enum_type_refs: EnumFn = if type_refs_fail { enum_failing } else { enum_type_defs };
        FakeObject::new(
            52,
            &[
                (slot::CLOSE_ENUM, close_enum as *const c_void),
                (slot::COUNT_ENUM, count_enum as *const c_void),
                (slot::RESET_ENUM, reset_enum as *const c_void),
                (slot::ENUM_TYPE_DEFS, enum_type_defs as *const c_void),
                (slot::ENUM_TYPE_REFS, enum_type_refs as *const c_void),
                (slot::ENUM_METHODS, enum_methods as *const c_void),
                (slot::GET_SIG_FROM_TOKEN, get_sig as *const c_void),
            ],
            Scope {
                types: types.to_vec(),
                methods: vec![0x0600_0001, 0x0600_0002],
                sig: [0x07, 0x01, 0x08],
                closes: Cell::new(0),
                last_scope: Cell::new(0),
            },
        )
    }

    fn session(object: &Fake) -> NativeImport<'static> {
        // SAFETY: the fake implements every slot the tests reach and
        // outlives the session.
        unsafe { NativeImport::new(ComPtr::from_raw(object.as_raw()).unwrap(), None) }
    }

    #[test]
    fn pages_through_vtable() {
        let types: Vec<u32> = (2..40).map(|rid| Token::from_parts(table::TYPE_DEF, rid).raw()).collect();
        let object = fake(&types, false);
        {
            let import = session(&object);
            let tokens = Enumerator::with_capacity(&import, 16)
                .collect(EnumQuery::TypeDefs)
                .unwrap();
            let raw: Vec<u32> = tokens.iter().map(|t| t.raw()).collect();
            assert_eq!(raw, types);
        }
        assert_eq!(object.state.closes.get(), 1);
        assert_eq!(object.released.get(), 1);
    }

    #[test]
    fn scoped_enumeration_passes_scope() {
        let object = fake(&[0x0200_0002], false);
        let import = session(&object);
        let scope = Token::new(0x0200_0002);
        let methods = Enumerator::new(&import).collect(EnumQuery::Methods(scope)).unwrap();
        assert_eq!(methods.len(), 2);
        assert_eq!(object.state.last_scope.get(), 0x0200_0002);
    }

    #[test]
    fn failed_page_still_closes_handle() {
        let object = fake(&[], true);
        let import = session(&object);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeRefs);
        let mut out = Vec::new();
        assert!(cursor.drain_into(&mut out, 4).is_err());
        assert!(cursor.is_opened());
        cursor.close();
        assert_eq!(object.state.closes.get(), 1);
    }

    #[test]
    fn reset_and_count_through_vtable() {
        let object = fake(&[1, 2, 3, 4, 5], false);
        let import = session(&object);
        let mut cursor = EnumCursor::open(&import, EnumQuery::TypeDefs);
        let mut first = Vec::new();
        cursor.drain_into(&mut first, 2).unwrap();
        assert_eq!(cursor.count().unwrap(), 5);
        cursor.reset(4).unwrap();
        let mut tail = Vec::new();
        cursor.drain_into(&mut tail, 2).unwrap();
        assert_eq!(tail, vec![Token::new(5)]);
    }

    #[test]
    fn signature_blob_is_borrowed_from_session() {
        let object = fake(&[], false);
        let import = session(&object);
        assert_eq!(import.sig_from_token(Token::new(0x1100_0001)).unwrap(), &[0x07, 0x01, 0x08]);
    }
}
