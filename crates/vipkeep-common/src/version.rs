//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "module"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Shared configuration, logging, and version primitives."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
//! Build metadata stamped by `vergen` at compile time. The daemon only
//! surfaces three facts about itself: version, commit, and build date.
//! `--version` prints them on one line and the metrics exporter labels
//! its build-info gauge with the first two.

/// Compile-time build facts. All values are static; a binary built
/// outside a git checkout carries `unknown` in place of git data.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub semver: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
}

const fn stamped(value: Option<&'static str>) -> &'static str {
    match value {
        Some(value) => value,
        None => "unknown",
    }
}

/// Metadata for the running binary.
pub const BUILD: BuildInfo = BuildInfo {
    semver: env!("CARGO_PKG_VERSION"),
    commit: stamped(option_env!("VERGEN_GIT_SHA")),
    built_at: stamped(option_env!("VERGEN_BUILD_TIMESTAMP")),
};

impl BuildInfo {
    /// Single line used by `--version` and the startup log.
    pub fn summary(&self) -> String {
        format!(
            "vipkeep v{} (commit: {}, built: {})",
            self.semver, self.commit, self.built_at
        )
    }
}
