//! 文件系统模块
//!
//! 这里只有块缓存；文件系统本身位于缓存之上，通过 `bread`/`bwrite`/`brelse` 使用它。

mod bio;

pub use bio::{Bcache, BlockId, Buf, BufData, BufFlags, BufId};
