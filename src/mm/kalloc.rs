//! 物理页分配器，带引用计数

use bit_field::BitField;
use thiserror::Error;

use core::ptr;

use crate::consts::{ALLOC_JUNK, FREE_JUNK, MAX_PAGE_REF, NPAGE, PGSIZE};
use crate::spinlock::SpinLock;
use super::addr::{Addr, PhysAddr};
use super::list::RunList;

/// 全局物理页分配器。
///
/// 以整页为单位分配物理内存，供用户页、内核栈、页表页和管道缓冲使用。
/// 每个页都带有引用计数，写时复制的多个映射可以共享同一个物理页，
/// 只有最后一个引用被放弃时该页才回到空闲链表。
///
/// # 安全性
///
/// 在调用 [`KMem::kinit`] 之前，[`KMem::kalloc`] 总是返回 `None`。
pub static KMEM: KMem = KMem::new();

/// 引用计数接口的可恢复错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KallocError {
    #[error("physical address {0:#x} is not page aligned")]
    Misaligned(usize),
    #[error("physical address {0:#x} is outside the managed range")]
    OutOfRange(usize),
    #[error("page {0:#x} reached the reference count limit")]
    RefOverflow(usize),
}

/// 物理页分配器封装结构。
///
/// 空闲链表、引用计数表和空闲位图都由同一把自旋锁保护，
/// 因此引用计数的增减与页的分配回收彼此之间是原子的。
pub struct KMem(SpinLock<FreeList>);

impl KMem {
    pub const fn new() -> Self {
        Self(SpinLock::new(FreeList::new(), "kmem"))
    }

    /// 初始化物理页分配器。
    ///
    /// 把 `[start, end)` 中所有完整的物理页交给分配器管理：
    /// `start` 向上、`end` 向下按页对齐，每一页先置引用计数为 1，
    /// 再经过与 `kfree` 相同的路径放入空闲链表，所以初始化结束后每一页都已被填充为垃圾数据。
    ///
    /// 引用计数表只有 `NPAGE` 项，超出部分的内存被忽略。
    ///
    /// # 安全性
    ///
    /// - 该区间必须是可写的、除分配器外无人使用的内存；
    /// - 只能调用一次，重复初始化会导致 panic。
    pub unsafe fn kinit(&self, start: usize, end: usize) {
        println!("kalloc: available physical memory [{:#x}, {:#x})", start, end);
        let npages = self.0.lock().init(start, end);
        println!("kalloc: init memory done, {} pages", npages);
    }

    /// 分配一个物理页。
    ///
    /// 返回页的内容全部为 `ALLOC_JUNK`，引用计数为 1。
    /// 没有空闲页时返回 `None`，由调用者决定如何处理。
    pub fn kalloc(&self) -> Option<PhysAddr> {
        let pa = self.0.lock().pop()?;
        // 此时该页只属于调用者，不需要持锁
        unsafe { ptr::write_bytes(pa.as_mut_ptr(), ALLOC_JUNK, PGSIZE) };
        Some(pa)
    }

    /// 放弃对物理页 `pa` 的一个引用。
    ///
    /// 引用计数大于 1 时只做递减；降为 0 时页被填充为 `FREE_JUNK` 并放回空闲链表。
    /// 地址未对齐、不在管理范围内或者该页已经空闲，都是致命错误。
    pub fn kfree(&self, pa: PhysAddr) {
        let mut guard = self.0.lock();
        match guard.index(pa) {
            Ok(i) => {
                guard.put(i, pa, "kfree");
            }
            Err(err) => panic!("kfree: {}", err),
        }
    }

    /// 为已分配的页增加一个引用，返回新的引用计数
    pub fn add_ref(&self, pa: PhysAddr) -> Result<u16, KallocError> {
        let mut guard = self.0.lock();
        let i = guard.index(pa)?;
        match guard.refcnt[i] {
            0 => panic!("kref: page {:#x} is free", pa.as_usize()),
            MAX_PAGE_REF => {
                #[cfg(feature = "kernel_warning")]
                println!("kalloc: reference count of page {:#x} saturated", pa.as_usize());
                Err(KallocError::RefOverflow(pa.as_usize()))
            }
            n => {
                guard.refcnt[i] = n + 1;
                Ok(n + 1)
            }
        }
    }

    /// 放弃一个引用，页被回收时返回 `true`。
    ///
    /// 与 `kfree` 的区别只在于地址错误以 `Err` 返回而不是 panic。
    pub fn drop_ref(&self, pa: PhysAddr) -> Result<bool, KallocError> {
        let mut guard = self.0.lock();
        let i = guard.index(pa)?;
        Ok(guard.put(i, pa, "kref"))
    }

    pub fn ref_count(&self, pa: PhysAddr) -> Result<u16, KallocError> {
        let guard = self.0.lock();
        let i = guard.index(pa)?;
        Ok(guard.refcnt[i])
    }

    pub fn free_pages(&self) -> usize {
        self.0.lock().nfree
    }

    /// 被管理的物理内存区间 `[base, end)`
    pub fn range(&self) -> (usize, usize) {
        let guard = self.0.lock();
        (guard.base, guard.end)
    }
}

struct FreeList {
    initialized: bool,
    base: usize,
    end: usize,
    nfree: usize,
    runs: RunList,
    refcnt: [u16; NPAGE],
    /// 每页一位，置位表示该页在空闲链表中
    free_map: [u8; NPAGE / 8],
}

// RunList 中是裸指针
unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> Self {
        Self {
            initialized: false,
            base: 0,
            end: 0,
            nfree: 0,
            runs: RunList::new(),
            refcnt: [0; NPAGE],
            free_map: [0; NPAGE / 8],
        }
    }

    unsafe fn init(&mut self, start: usize, end: usize) -> usize {
        if self.initialized {
            panic!("kinit: already initialized");
        }
        self.initialized = true;

        let mut base = PhysAddr::from_raw(start);
        base.pg_round_up();
        let mut top = PhysAddr::from_raw(end);
        top.pg_round_down();
        let base = base.as_usize();
        let mut top = top.as_usize().max(base);
        let npages = (top - base) / PGSIZE;
        if npages > NPAGE {
            #[cfg(feature = "kernel_warning")]
            println!("kalloc: ignore {} pages beyond the reference table", npages - NPAGE);
            top = base + NPAGE * PGSIZE;
        }
        self.base = base;
        self.end = top;

        #[cfg(feature = "verbose_init_info")]
        println!("kalloc: managing [{:#x}, {:#x})", base, top);

        let mut pa = PhysAddr::from_raw(base);
        while pa.as_usize() < top {
            let i = (pa.as_usize() - base) / PGSIZE;
            self.refcnt[i] = 1;
            self.put(i, pa, "kinit");
            pa.add_page();
        }
        self.nfree
    }

    fn index(&self, pa: PhysAddr) -> Result<usize, KallocError> {
        let raw = pa.as_usize();
        if raw % PGSIZE != 0 {
            return Err(KallocError::Misaligned(raw));
        }
        if raw < self.base || raw >= self.end {
            return Err(KallocError::OutOfRange(raw));
        }
        Ok((raw - self.base) / PGSIZE)
    }

    fn is_free(&self, i: usize) -> bool {
        self.free_map[i / 8].get_bit(i % 8)
    }

    fn set_free(&mut self, i: usize, free: bool) {
        self.free_map[i / 8].set_bit(i % 8, free);
    }

    fn pop(&mut self) -> Option<PhysAddr> {
        let raw = self.runs.peek()?;
        let pa = unsafe { PhysAddr::from_raw(raw) };
        let i = match self.index(pa) {
            Ok(i) if self.is_free(i) => i,
            _ => panic!("kalloc: freelist corrupted at {:#x}", raw),
        };
        if self.refcnt[i] != 0 {
            panic!("kalloc: free page {:#x} has {} references", raw, self.refcnt[i]);
        }
        unsafe { self.runs.pop(); }
        self.set_free(i, false);
        self.nfree -= 1;
        self.refcnt[i] = 1;
        Some(pa)
    }

    /// 减少一个引用，降为 0 时回收该页
    fn put(&mut self, i: usize, pa: PhysAddr, who: &str) -> bool {
        match self.refcnt[i] {
            0 => panic!("{}: page {:#x} is already free", who, pa.as_usize()),
            1 => {}
            n => {
                self.refcnt[i] = n - 1;
                return false;
            }
        }
        self.refcnt[i] = 0;
        unsafe {
            ptr::write_bytes(pa.as_mut_ptr(), FREE_JUNK, PGSIZE);
            self.runs.push(pa.as_usize());
        }
        self.set_free(i, true);
        self.nfree += 1;
        true
    }
}
