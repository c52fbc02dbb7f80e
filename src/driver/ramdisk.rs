//! 内存盘：把一段常驻内存当作块设备
//!
//! 内核可以用它挂载随内核一起加载的磁盘镜像，测试用它代替真实磁盘。

use core::sync::atomic::{AtomicUsize, Ordering};

use super::BlockDevice;
use crate::consts::fs::BSIZE;
use crate::fs::{BlockId, BufData};
use crate::spinlock::SpinLock;

pub struct RamDisk {
    dev: u32,
    nblocks: usize,
    image: SpinLock<&'static mut [u8]>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// 以 `image` 作为设备 `dev` 的内容，镜像末尾不足一个块的部分不使用。
    pub fn new(dev: u32, image: &'static mut [u8]) -> Self {
        let nblocks = image.len() / BSIZE;
        Self {
            dev,
            nblocks,
            image: SpinLock::new(image, "ramdisk"),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// 已完成的读盘次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 已完成的写盘次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 直接读取镜像中的一个块，绕过缓存
    pub fn peek(&self, blockno: u32, out: &mut [u8; BSIZE]) {
        let range = self.block_range(blockno);
        out.copy_from_slice(&self.image.lock()[range]);
    }

    fn block_range(&self, blockno: u32) -> core::ops::Range<usize> {
        let blockno = blockno as usize;
        if blockno >= self.nblocks {
            panic!("ramdisk: blockno {} out of range {}", blockno, self.nblocks);
        }
        blockno * BSIZE..(blockno + 1) * BSIZE
    }
}

impl BlockDevice for RamDisk {
    fn rw(&self, block: BlockId, data: &mut BufData, writing: bool) {
        if block.dev != self.dev {
            panic!("ramdisk: request for dev {} on dev {}", block.dev, self.dev);
        }
        let range = self.block_range(block.blockno);
        let mut image = self.image.lock();
        if writing {
            image[range].copy_from_slice(&data[..]);
            self.writes.fetch_add(1, Ordering::Relaxed);
        } else {
            data.copy_from_slice(&image[range]);
            self.reads.fetch_add(1, Ordering::Relaxed);
        }
        drop(image);
    }
}
