//! 核心模块: 描述符状态机、归档持久化、管理器与连接性决策

pub mod actor_manager;
pub mod archive;
pub mod connectivity;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod reachable;

pub use actor_manager::{
    AddDescriptor, CancelDescriptor, DescriptorManagerActor, GetStats, KillAllDescriptors,
    ManagerStats, Resume, RetryDescriptor, Subscribe, Suspend,
};
pub use archive::{ArchiveMigrating, DescriptorArchiver};
pub use connectivity::{ConnectivityManagerActor, Reachability};
pub use descriptor::{Descriptor, DescriptorKind, DescriptorState, RetryPolicy, UploadStep};
pub use error::{ConnectionErrorKind, UploadError};
pub use events::DescriptorEvent;
pub use reachable::ReachableDescriptorManager;
