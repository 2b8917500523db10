//! Loading native implementations and acquiring their dispensers.
//!
//! A [`NativeModule`] is one loaded dynamic library. It is constructed once
//! per run and passed by reference; every dispenser and session created
//! from it keeps the library mapped until they are dropped.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use libloading::Library;
use mdimport::{Dispenser, Flavor, HarnessError, MetadataImport, Status};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::com::{CLSID_COR_METADATA_DISPENSER, ComPtr, Guid, IID_IMETADATA_DISPENSER, IID_IMETADATA_IMPORT};
use crate::error::{NativeError, Result};
use crate::import::NativeImport;

/// `IMetaDataDispenser::OpenScopeOnMemory`
const SLOT_OPEN_SCOPE_ON_MEMORY: usize = 5;

/// `CorOpenFlags::ofReadOnly`
const OF_READ_ONLY: u32 = 0x10;

type OpenScopeOnMemoryFn = unsafe extern "system" fn(
    this: *mut c_void,
    data: *const c_void,
    len: u32,
    flags: u32,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> i32;

type ClassFactoryFn =
    unsafe extern "system" fn(rclsid: *const Guid, riid: *const Guid, out: *mut *mut c_void) -> i32;

type InterfaceFactoryFn = unsafe extern "system" fn(riid: *const Guid, out: *mut *mut c_void) -> i32;

/// Base name of the benchmark library.
const REGNATIVE: &str = "regnative";

/// Platform file name of the benchmark library: `regnative.dll`,
/// `libregnative.dylib` or `libregnative.so`.
pub fn default_library_name() -> String {
    libloading::library_filename(REGNATIVE)
        .to_string_lossy()
        .into_owned()
}

/// Calling convention of a dispenser factory export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactoryAbi {
    /// `HRESULT f(REFCLSID, REFIID, void**)`, e.g. `MetaDataGetDispenser`.
    #[default]
    ClassFactory,
    /// `HRESULT f(REFIID, void**)`, e.g. `GetDispenser`.
    Interface,
}

impl FactoryAbi {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClassFactory => "class-factory",
            Self::Interface => "interface",
        }
    }
}

impl fmt::Display for FactoryAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactoryAbi {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "class-factory" | "classfactory" => Ok(Self::ClassFactory),
            "interface" => Ok(Self::Interface),
            other => Err(format!(
                "unknown factory ABI {other:?} (expected class-factory or interface)"
            )),
        }
    }
}

/// Where to find one implementation's dispenser factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorySpec {
    pub library: PathBuf,
    pub symbol: String,
    pub abi: FactoryAbi,
}

impl FactorySpec {
    /// Default factory export of the baseline runtime.
    pub const BASELINE_SYMBOL: &'static str = "MetaDataGetDispenser";
    /// Default factory export of the current implementation.
    pub const CURRENT_SYMBOL: &'static str = "GetDispenser";

    pub fn new(library: impl Into<PathBuf>, symbol: impl Into<String>, abi: FactoryAbi) -> Self {
        Self {
            library: library.into(),
            symbol: symbol.into(),
            abi,
        }
    }

    /// Default symbol and ABI for one side.
    pub fn for_flavor(flavor: Flavor, library: impl Into<PathBuf>) -> Self {
        match flavor {
            Flavor::Baseline => Self::new(library, Self::BASELINE_SYMBOL, FactoryAbi::ClassFactory),
            Flavor::Current => Self::new(library, Self::CURRENT_SYMBOL, FactoryAbi::Interface),
        }
    }

    /// Load the library and acquire its dispenser.
    pub fn open(&self, flavor: Flavor) -> Result<NativeDispenser> {
        NativeModule::load(&self.library)?.dispenser(flavor, &self.symbol, self.abi)
    }
}

/// A loaded dynamic library.
#[derive(Clone)]
pub struct NativeModule {
    path: PathBuf,
    library: Arc<Library>,
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule").field("path", &self.path).finish_non_exhaustive()
    }
}

impl NativeModule {
    /// Load a library by path (or bare file name, resolved by the loader).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; the libraries
        // named here are metadata implementations built for this harness.
        let library = unsafe { Library::new(&path) }.map_err(|source| NativeError::Load {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "native library loaded");
        Ok(Self {
            path,
            library: Arc::new(library),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported function.
    ///
    /// # Safety
    ///
    /// `F` must be the exact function pointer type of the export.
    pub(crate) unsafe fn function<F: Copy>(&self, symbol: &str) -> Result<F> {
        // SAFETY: guaranteed by the caller.
        let resolved = unsafe { self.library.get::<F>(symbol.as_bytes()) };
        resolved.map(|f| *f).map_err(|source| NativeError::Symbol {
            path: self.path.clone(),
            symbol: symbol.to_string(),
            source,
        })
    }

    /// Acquire an `IMetaDataDispenser` through the factory `symbol`.
    pub fn dispenser(&self, flavor: Flavor, symbol: &str, abi: FactoryAbi) -> Result<NativeDispenser> {
        let mut raw: *mut c_void = std::ptr::null_mut();
        // SAFETY: the export's signature is selected by `abi`; the GUIDs
        // are 'static and `raw` is writable.
        let hr = unsafe {
            match abi {
                FactoryAbi::ClassFactory => {
                    let factory: ClassFactoryFn = self.function(symbol)?;
                    factory(&CLSID_COR_METADATA_DISPENSER, &IID_IMETADATA_DISPENSER, &raw mut raw)
                }
                FactoryAbi::Interface => {
                    let factory: InterfaceFactoryFn = self.function(symbol)?;
                    factory(&IID_IMETADATA_DISPENSER, &raw mut raw)
                }
            }
        };
        let status = Status(hr);
        if status.is_failure() {
            return Err(NativeError::Factory {
                symbol: symbol.to_string(),
                status,
            });
        }
        // SAFETY: on success the factory hands over one reference.
        let com = unsafe { ComPtr::from_raw(raw) }.ok_or_else(|| NativeError::NullInterface {
            what: symbol.to_string(),
        })?;
        debug!(%flavor, symbol, %abi, "dispenser acquired");
        Ok(NativeDispenser {
            flavor,
            com,
            library: Some(Arc::clone(&self.library)),
        })
    }
}

/// An `IMetaDataDispenser` from one native implementation.
pub struct NativeDispenser {
    flavor: Flavor,
    com: ComPtr,
    library: Option<Arc<Library>>,
}

impl NativeDispenser {
    /// Raw interface pointer, for entry points that take a dispenser.
    pub fn as_raw(&self) -> *mut c_void {
        self.com.as_raw()
    }

    #[cfg(test)]
    pub(crate) const fn from_com(flavor: Flavor, com: ComPtr) -> Self {
        Self {
            flavor,
            com,
            library: None,
        }
    }
}

impl Dispenser for NativeDispenser {
    fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn open_scope<'img>(
        &self,
        image: &'img [u8],
    ) -> std::result::Result<Box<dyn MetadataImport + 'img>, HarnessError> {
        let what = format!("{} OpenScopeOnMemory", self.flavor);
        let len = u32::try_from(image.len()).map_err(|_| HarnessError::OpenFailure {
            what: what.clone(),
            status: Status::E_INVALIDARG,
        })?;
        let mut raw: *mut c_void = std::ptr::null_mut();
        // SAFETY: slot 5 is OpenScopeOnMemory. The image is opened
        // read-only and in place, so the session borrows it for `'img`.
        let hr = unsafe {
            let open: OpenScopeOnMemoryFn = self.com.slot(SLOT_OPEN_SCOPE_ON_MEMORY);
            open(
                self.com.as_raw(),
                image.as_ptr().cast(),
                len,
                OF_READ_ONLY,
                &IID_IMETADATA_IMPORT,
                &raw mut raw,
            )
        };
        Status(hr)
            .into_result()
            .map_err(|status| HarnessError::OpenFailure {
                what: what.clone(),
                status,
            })?;
        // SAFETY: success transfers one IMetaDataImport reference.
        let com = unsafe { ComPtr::from_raw(raw) }.ok_or(HarnessError::OpenFailure {
            what,
            status: Status::E_POINTER,
        })?;
        // SAFETY: `com` implements IMetaDataImport over `image`.
        Ok(Box::new(unsafe { NativeImport::new(com, self.library.clone()) }))
    }
}
