// Tillpoint - multi-branch point-of-sale platform core.
//
// This facade re-exports the platform crates so applications can depend on
// a single package.

// Re-export branch database routing
pub use tillpoint_branchdb::*;

// Re-export logging
#[cfg(feature = "log")]
pub use tillpoint_log;
