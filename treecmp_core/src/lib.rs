pub mod classifier;
pub mod comparison;
pub mod hasher;
pub mod lifecycle;
#[cfg(feature = "archives")]
pub mod stager;
pub mod walker;

pub use classifier::DiffClassifier;
pub use comparison::{ComparisonEngine, Subject};
pub use hasher::ContentHasher;
pub use lifecycle::{sweep_stale, CleanupReport, RequestScope, SweepReport};
#[cfg(feature = "archives")]
pub use stager::{ArchiveKind, ArchiveStager, StagedArchive};
pub use walker::{PathWalker, WalkedFile};
