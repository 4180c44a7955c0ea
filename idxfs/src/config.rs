//! 常量与缓存配置

use core::time::Duration;

/// 扇区大小，也是缓存槽与磁盘 inode 记录的大小
pub const SECTOR_SIZE: usize = 512;

/// 缓存槽个数
pub const CACHE_SLOTS: usize = 64;

/// 后台回写的周期
pub const WRITE_BEHIND_INTERVAL: Duration = Duration::from_secs(30);

/// 预读队列的容量，超出的请求直接丢弃
pub const READ_AHEAD_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub slots: usize,
    pub write_behind_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slots: CACHE_SLOTS,
            write_behind_interval: WRITE_BEHIND_INTERVAL,
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots,
            ..Default::default()
        }
    }
}
