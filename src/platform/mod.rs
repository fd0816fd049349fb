//! OS-specific backends for the core engine. Only Linux is implemented;
//! every entry point used from `core::` is `#[cfg(target_os = "linux")]`
//! guarded at the call site so the crate still type-checks elsewhere.

#[cfg(target_os = "linux")]
pub mod linux;
