pub mod access;
pub mod composer;
pub mod directory;
pub mod fanout;
pub mod store;
pub mod stream;

// 重新导出常用类型
pub use access::TaskAccessService;
pub use directory::{MemoryRecipientDirectory, MemoryTaskDirectory, RecipientDirectory, TaskDirectory};
pub use fanout::NotificationService;
pub use store::{MemoryNotificationStore, MemorySharingStore, NotificationStore, SharingStore};
pub use stream::NotificationStream;
