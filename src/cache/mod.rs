// 响应缓存模块
// 包含缓存存储和缓存键生成

pub mod keys;
mod store;

pub use store::{CacheStats, ResponseCache};
