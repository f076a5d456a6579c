//! Build metadata embedded by `build.rs`

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit SHA
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

pub const GIT_COMMIT_TIMESTAMP: &str = env!("VERGEN_GIT_COMMIT_TIMESTAMP");

pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

/// `"true"` when the working tree had uncommitted changes
pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// `<version> (<git_sha>[ dirty])`
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// Multi-line build report, served at `/version`.
pub fn build_info() -> String {
    format!(
        "partymq {VERSION}\n\
         commit: {GIT_SHA} ({GIT_COMMIT_TIMESTAMP})\n\
         branch: {GIT_BRANCH}\n\
         built:  {BUILD_TIMESTAMP}\n\
         rustc:  {RUSTC_VERSION}\n\
         target: {TARGET}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_version_starts_with_crate_version() {
        let version = full_version();
        assert!(version.starts_with(VERSION));
        assert!(version.contains(GIT_SHA));
    }

    #[test]
    fn test_build_info_lists_target() {
        assert!(build_info().starts_with("partymq "));
        assert!(build_info().contains(TARGET));
    }
}
