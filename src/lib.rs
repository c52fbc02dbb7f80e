//! xv6 内核的块缓存与物理页分配器
//!
//! 内核启动时先用 `set_console` 注册串口输出、用 `set_scheduler` 注册进程调度，
//! 再调用 `KMEM.kinit` 交出空闲物理内存，之后即可通过 `Bcache` 读写磁盘块。

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

#[macro_use]
pub mod printf;

pub mod consts;
pub mod driver;
pub mod fs;
pub mod mm;
pub mod process;
pub mod sleeplock;
pub mod spinlock;
pub mod trap;

pub use driver::{BlockDevice, RamDisk};
pub use fs::{Bcache, BlockId, Buf, BufData, BufFlags, BufId};
pub use mm::{Addr, KMem, KallocError, PhysAddr, KMEM};
pub use printf::set_console;
pub use process::{set_scheduler, Scheduler};
pub use trap::{clock_intr, Clock, Ticks, TICKS_CLOCK};
