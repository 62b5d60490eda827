//! The patch graph and path resolution.
mod file;
pub use file::UpgradeFile;

mod resolve;
pub use resolve::{Resolver, Target};

mod segment;
pub use segment::{PatchSegment, SegmentKind};

/// How a possibly absent version is shown in messages.
pub fn display_version(version: Option<&str>) -> &str {
    version.unwrap_or("<no version>")
}
