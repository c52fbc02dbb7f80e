//! 设备驱动模块，缓存层只依赖块设备的同步读写

use crate::fs::{BlockId, BufData};

pub mod ramdisk;

pub use ramdisk::RamDisk;

/// 块设备
///
/// 缓存层在只持有该缓冲区睡眠锁的情况下调用 `rw`，
/// 实现可以阻塞直到传输完成，但不得再回头访问缓存。
pub trait BlockDevice: Sync {
    /// 在 `block` 与 `data` 之间传输一个块，`writing` 为真时写盘，否则读盘。
    fn rw(&self, block: BlockId, data: &mut BufData, writing: bool);
}
