//! 记忆层：工作记忆（单轮）、会话记忆（文件 LRU + 对话窗口）、持久记录（偏好、回答缓存、文件哈希、执行日志）

pub mod cache;
pub mod conversation;
pub mod manager;
pub mod persistent;
pub mod preferences;
pub mod session;
pub mod working;

pub use cache::{CacheDeduplicator, CacheWrite};
pub use conversation::{ConversationMemory, ConversationTurn, Message, Role};
pub use manager::MemoryManager;
pub use persistent::{CacheEntry, ExecutionLogEntry, PersistentRecord, PersistentStore};
pub use preferences::{extract_preferences, is_key_value};
pub use session::SessionMemory;
pub use working::WorkingMemory;
