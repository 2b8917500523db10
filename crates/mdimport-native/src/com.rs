//! Minimal COM plumbing: GUIDs, owned interface pointers and vtable slots.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// Binary GUID layout used for CLSIDs and IIDs.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

/// `CLSID_CorMetaDataDispenser`
pub const CLSID_COR_METADATA_DISPENSER: Guid = Guid::new(
    0xe5cb_7a31,
    0x7512,
    0x11d2,
    [0x89, 0xce, 0x00, 0x80, 0xc7, 0x92, 0xe5, 0xd8],
);

/// `IID_IMetaDataDispenser`
pub const IID_IMETADATA_DISPENSER: Guid = Guid::new(
    0x809c_652e,
    0x7396,
    0x11d2,
    [0x97, 0x71, 0x00, 0xa0, 0xc9, 0xb4, 0xd5, 0x0c],
);

/// `IID_IMetaDataImport`
pub const IID_IMETADATA_IMPORT: Guid = Guid::new(
    0x7dac_8207,
    0xd3ae,
    0x4c75,
    [0x9b, 0x67, 0x92, 0x80, 0x1a, 0x49, 0x7d, 0x44],
);

/// `IUnknown::Release`
const SLOT_RELEASE: usize = 2;

type ReleaseFn = unsafe extern "system" fn(this: *mut c_void) -> u32;

/// Owned reference to a COM interface. Released exactly once on drop.
///
/// Holds a raw pointer, so it is neither `Send` nor `Sync`.
pub(crate) struct ComPtr(NonNull<c_void>);

impl ComPtr {
    /// Take ownership of one reference.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live COM interface pointer whose reference is
    /// transferred to the returned value.
    pub(crate) unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw).map(Self)
    }

    pub(crate) const fn as_raw(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Read vtable entry `index` as a function pointer of type `F`.
    ///
    /// # Safety
    ///
    /// The interface's vtable must have at least `index + 1` entries and
    /// entry `index` must have the signature `F`.
    pub(crate) unsafe fn slot<F: Copy>(&self, index: usize) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<*const c_void>());
        // SAFETY: a COM object starts with a pointer to its vtable, an array
        // of function pointers; the caller guarantees the slot's signature.
        unsafe {
            let vtable = *self.0.as_ptr().cast::<*const *const c_void>();
            let entry = *vtable.add(index);
            std::mem::transmute_copy::<*const c_void, F>(&entry)
        }
    }
}

impl Drop for ComPtr {
    fn drop(&mut self) {
        // SAFETY: every COM interface has IUnknown::Release in slot 2, and
        // this value owns exactly one reference.
        unsafe {
            let release: ReleaseFn = self.slot(SLOT_RELEASE);
            release(self.as_raw());
        }
    }
}
