use crate::error::Result;
use podforge_core::Build;

/// Error からは遷移しない
pub(super) fn handle(build: Build) -> Result<Build> {
    Ok(build)
}
