use domain::common::error::DomainError;
use domain::ipset::taxonomy::SetKind;

/// Secondary port for programming grouping primitives into the kernel
/// packet filter.
///
/// The lifecycle core only decides *what* should exist; this seam is
/// where a platform-specific driver (ipset/nftables on Linux, an eBPF
/// map adapter, ...) turns those decisions into kernel commands. All
/// names crossing this boundary are hashed names — the kernel-visible,
/// length-bounded identifiers.
///
/// Implementations must be synchronous and bounded per call; the sync
/// actor batches calls outside the engine's critical section.
pub trait DataplanePort: Send + Sync {
    /// Create an empty kernel set of the given kind. Creating a set that
    /// already exists must be a no-op.
    fn create_set(&mut self, hashed_name: &str, kind: SetKind) -> Result<(), DomainError>;

    /// Destroy a kernel set. The caller guarantees the set is no longer
    /// referenced by any programmed rule or list.
    fn destroy_set(&mut self, hashed_name: &str) -> Result<(), DomainError>;

    /// Replace a set's members wholesale. For hash-kind sets members are
    /// leaf identities; for list-kind sets they are member hashed names.
    fn replace_members(&mut self, hashed_name: &str, members: &[String])
        -> Result<(), DomainError>;

    /// Number of sets currently programmed.
    fn set_count(&self) -> Result<usize, DomainError>;
}
