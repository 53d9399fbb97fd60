//! External collaborators
//!
//! Everything heavyweight is delegated to opaque commands: the archive
//! producer, the streaming cipher, the snapshot copier, the container
//! runtime, and the vault CLI. Each collaborator sits behind a trait so
//! the orchestrator and the tests never depend on the binaries being
//! installed.

pub mod archiver;
pub mod cipher;
pub mod command;
pub mod containers;
pub mod copier;
pub mod vault;

pub use archiver::{ArchiveOutcome, Archiver, TarArchiver};
pub use cipher::CommandCipher;
pub use containers::{ContainerRuntime, DockerRuntime, RunningSet};
pub use copier::{RsyncCopier, SnapshotCopier};
pub use vault::{BitwardenCli, VaultCli, VaultPipeline, VaultReport};
