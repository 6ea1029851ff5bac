pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod locks;
pub mod mirror;
pub mod remote;
pub mod router;
pub mod tree;
pub mod value;

pub use broker::{MirrorUpdate, Subscription};
pub use config::EngineConfig;
pub use engine::{PullReport, SweepReport};
pub use error::{HubError, InvalidPath, RemoteError, StoreError, SyncError};
pub use gateway::WriteAck;
pub use hub::MirrorHub;
pub use mirror::{FileMirrorStore, MemoryMirrorStore, MirrorRecord, MirrorStore};
pub use remote::{HttpRemote, MemoryRemote, OfflineRemote, RemoteStore};
pub use router::MirrorKey;
pub use value::Node;
