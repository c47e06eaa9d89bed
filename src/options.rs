//! Immutable run configuration derived once from the CLI, then threaded by
//! reference through the whole check/repair pipeline rather than living as
//! process-wide globals.

/// CLI-derived configuration for one run. Constructed once in `main` from the
/// parsed `clap::Parser` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Sector size forced with `-b/--blocksize`; `None` means auto-detect.
    pub forced_sector_size: Option<u32>,
    /// Prompt before each repair (`-i/--interactive`).
    pub interactive: bool,
    /// Apply repairs without prompting (`-a/--autofix`).
    pub autofix: bool,
    /// `-v` stacked count minus `-q`; negative means quieter than the default.
    pub verbosity: i8,
}

impl RunOptions {
    /// Whether any repair write is permitted at all, interactive or not.
    pub fn repairs_enabled(&self) -> bool {
        self.interactive || self.autofix
    }
}
