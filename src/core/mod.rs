pub mod locks;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod profiles;
pub mod retention;
pub mod session;
pub mod storage;
pub mod writer;

pub use locks::DirectoryLocks;
pub use models::{BackupArtifact, BatchReport, DeviceDescriptor, DeviceOutcome, DeviceRecord};
pub use orchestrator::Orchestrator;
pub use profiles::{ExecutionStrategy, ProfileRegistry, VendorProfile};
pub use retention::{PruneReport, RetentionManager};
pub use session::{RemoteSession, SessionConnector, SessionExecutor};
pub use storage::{Storage, StorageLayout};
pub use writer::{BackupWriter, MirrorOutcome};
