#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

//! C ABI over the package-management bridge. Every call returns a
//! [`bridge_result`] whose strings the host releases with `pkgbridge_free`.

pub mod exports;
pub mod ffi;

pub use exports::*;
pub use ffi::bridge_result;
