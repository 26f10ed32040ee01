//! Dynamic loading of libva.
//!
//! Only the symbols the engine actually calls are resolved. Loading is
//! expected to fail on machines without a VA-API stack; callers treat
//! that as "hardware path unavailable", not as an error worth aborting
//! over.

use std::os::raw::{c_char, c_int, c_void};

use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

/// Opaque VADisplay pointer.
pub type VaDisplay = *mut c_void;
/// VAStatus return code; 0 is success.
pub type VaStatus = c_int;
/// VASurfaceID as used by the sync entry points.
pub type VaSurfaceId = u32;

pub const VA_STATUS_SUCCESS: VaStatus = 0;

/// Failure to load the VA-API stack.
#[derive(Error, Debug)]
pub enum VaLoadError {
    #[error("failed to load {name}: {source}")]
    LibraryNotFound {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("missing symbol {name}: {source}")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

type FnGetDisplayDrm = unsafe extern "C" fn(c_int) -> VaDisplay;
type FnInitialize = unsafe extern "C" fn(VaDisplay, *mut c_int, *mut c_int) -> VaStatus;
type FnTerminate = unsafe extern "C" fn(VaDisplay) -> VaStatus;
type FnQueryVendorString = unsafe extern "C" fn(VaDisplay) -> *const c_char;
type FnSyncSurface = unsafe extern "C" fn(VaDisplay, VaSurfaceId) -> VaStatus;
type FnErrorStr = unsafe extern "C" fn(VaStatus) -> *const c_char;

/// Resolved VA-API entry points.
///
/// The raw function pointers are only reachable through the safe wrappers
/// below, which keep the display handle and status translation in one
/// place.
pub struct VaLibrary {
    get_display_drm: FnGetDisplayDrm,
    initialize: FnInitialize,
    terminate: FnTerminate,
    query_vendor_string: FnQueryVendorString,
    sync_surface: FnSyncSurface,
    error_str: FnErrorStr,
    // Field order matters: the libraries must outlive the symbols above,
    // and Rust drops fields in declaration order.
    _va_drm: Library,
    _va: Library,
}

impl VaLibrary {
    /// Load libva and libva-drm and resolve the required symbols.
    pub fn load() -> Result<Self, VaLoadError> {
        let va = Self::open("libva.so.2")?;
        let va_drm = Self::open("libva-drm.so.2")?;

        // SAFETY: symbol names and signatures match the libva 1.x ABI.
        // The function pointers are copied out of the `Symbol` guards but
        // the owning `Library` handles are stored alongside them, so the
        // code they point at stays mapped for the life of `VaLibrary`.
        unsafe {
            let get_display_drm = *Self::symbol(&va_drm, "vaGetDisplayDRM")?;
            let initialize = *Self::symbol(&va, "vaInitialize")?;
            let terminate = *Self::symbol(&va, "vaTerminate")?;
            let query_vendor_string = *Self::symbol(&va, "vaQueryVendorString")?;
            let sync_surface = *Self::symbol(&va, "vaSyncSurface")?;
            let error_str = *Self::symbol(&va, "vaErrorStr")?;

            info!("libva loaded");
            Ok(Self {
                get_display_drm,
                initialize,
                terminate,
                query_vendor_string,
                sync_surface,
                error_str,
                _va_drm: va_drm,
                _va: va,
            })
        }
    }

    fn open(name: &'static str) -> Result<Library, VaLoadError> {
        // SAFETY: loading libva executes its constructors, which only set
        // up internal dispatch tables.
        unsafe {
            Library::new(name).map_err(|source| {
                debug!(name, error = %source, "library not loadable");
                VaLoadError::LibraryNotFound { name, source }
            })
        }
    }

    unsafe fn symbol<'l, T>(
        lib: &'l Library,
        name: &'static str,
    ) -> Result<libloading::Symbol<'l, T>, VaLoadError> {
        lib.get(name.as_bytes())
            .map_err(|source| VaLoadError::MissingSymbol { name, source })
    }

    /// Obtain a VADisplay for an open DRM render node fd.
    pub fn display_for_drm_fd(&self, fd: c_int) -> VaDisplay {
        // SAFETY: fd is a valid open render node owned by the caller.
        unsafe { (self.get_display_drm)(fd) }
    }

    /// Initialize the display; returns the driver's (major, minor) version.
    pub fn initialize(&self, display: VaDisplay) -> Result<(i32, i32), VaStatus> {
        let mut major: c_int = 0;
        let mut minor: c_int = 0;
        // SAFETY: display came from `display_for_drm_fd` and is not yet
        // terminated; the out-pointers are live locals.
        let status = unsafe { (self.initialize)(display, &mut major, &mut minor) };
        if status == VA_STATUS_SUCCESS {
            Ok((major, minor))
        } else {
            Err(status)
        }
    }

    pub fn terminate(&self, display: VaDisplay) {
        // SAFETY: display is valid and initialized; terminate is the last
        // call made on it.
        unsafe {
            (self.terminate)(display);
        }
    }

    /// Driver vendor string, if the driver provides one.
    pub fn vendor_string(&self, display: VaDisplay) -> Option<String> {
        // SAFETY: display is valid; the returned pointer is a static
        // string owned by the driver.
        unsafe {
            let ptr = (self.query_vendor_string)(display);
            if ptr.is_null() {
                None
            } else {
                Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    /// Block until the device has finished all work on `surface`.
    pub fn sync_surface(&self, display: VaDisplay, surface: VaSurfaceId) -> Result<(), VaStatus> {
        // SAFETY: display is valid; surface ids are opaque to us and
        // validated by the driver.
        let status = unsafe { (self.sync_surface)(display, surface) };
        if status == VA_STATUS_SUCCESS {
            Ok(())
        } else {
            Err(status)
        }
    }

    /// Human-readable description of a VAStatus code.
    pub fn describe_status(&self, status: VaStatus) -> String {
        // SAFETY: vaErrorStr returns a static string for any status value.
        unsafe {
            let ptr = (self.error_str)(status);
            if ptr.is_null() {
                format!("VAStatus({status})")
            } else {
                std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        }
    }
}

impl std::fmt::Debug for VaLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaLibrary").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Machines with a VA-API stack are the exception in CI; the only
    // universally testable property is that a failed load reports which
    // library was missing.
    #[test]
    fn load_reports_missing_library_by_name() {
        match VaLibrary::load() {
            Ok(_) => {} // host has libva; nothing further to assert
            Err(VaLoadError::LibraryNotFound { name, .. }) => {
                assert!(name.starts_with("libva"));
            }
            Err(VaLoadError::MissingSymbol { .. }) => {
                panic!("libva present but ABI-incomplete")
            }
        }
    }
}
