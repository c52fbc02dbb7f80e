//! 提供物理地址包装

use core::convert::TryFrom;
use core::result::Result;

use crate::consts::PGSIZE;
use super::KallocError;

/// 以页为单位移动的地址
pub trait Addr: Copy {
    fn as_usize(&self) -> usize;

    fn set(&mut self, raw: usize);

    #[inline]
    fn pg_round_up(&mut self) {
        self.set((self.as_usize() + PGSIZE - 1) & !(PGSIZE - 1))
    }

    #[inline]
    fn pg_round_down(&mut self) {
        self.set(self.as_usize() & !(PGSIZE - 1))
    }

    #[inline]
    fn add_page(&mut self) {
        self.set(self.as_usize() + PGSIZE)
    }

    /// 地址处的字节指针，用于整页填充
    #[inline]
    fn as_mut_ptr(&self) -> *mut u8 {
        self.as_usize() as *mut u8
    }
}

/// 物理页的地址，由 `kalloc` 交出、由 `kfree` 收回
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PhysAddr(usize);

impl Addr for PhysAddr {
    #[inline]
    fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    fn set(&mut self, raw: usize) {
        self.0 = raw;
    }
}

impl PhysAddr {
    /// # 安全性
    /// 不检查对齐，`kfree` 等接口仍会检查。
    #[inline]
    pub unsafe fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl TryFrom<usize> for PhysAddr {
    type Error = KallocError;

    fn try_from(addr: usize) -> Result<Self, Self::Error> {
        if addr % PGSIZE != 0 {
            return Err(KallocError::Misaligned(addr));
        }
        Ok(PhysAddr(addr))
    }
}
