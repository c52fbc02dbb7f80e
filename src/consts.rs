//! 内核常量

/// 页大小
pub const PGSIZE: usize = 4096;

/// 物理内存起止地址，内核从 KERNBASE 开始，可分配内存到 PHYSTOP 为止
pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

/// 引用计数表能够覆盖的物理页数
pub const NPAGE: usize = (PHYSTOP - KERNBASE) / PGSIZE;

/// 单个物理页引用计数的上限
pub const MAX_PAGE_REF: u16 = u16::MAX;

/// kalloc 分配出的页面填充值，用于暴露读取未初始化内存的错误
pub const ALLOC_JUNK: u8 = 5;

/// kfree 回收的页面填充值，用于暴露悬垂引用
pub const FREE_JUNK: u8 = 1;

pub mod fs {
    /// 块大小
    pub const BSIZE: usize = 1024;

    /// 单个文件系统操作最多写入的块数
    pub const MAXOPBLOCKS: usize = 10;

    /// 磁盘块缓存的默认大小
    pub const NBUF: usize = MAXOPBLOCKS * 3;

    /// 缓存散列桶的数量
    pub const NR_HASH: usize = 13;
}
