//! 内存管理模块

pub use addr::{Addr, PhysAddr};
pub use kalloc::{KMem, KallocError, KMEM};

mod addr;
pub mod kalloc;
mod list;
