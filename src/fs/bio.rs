//! 缓存层
//!
//! 磁盘块缓存由固定数量的缓冲区组成，按 (设备号, 块号) 散列到 `NR_HASH` 个桶中，
//! 每个桶有自己的自旋锁，保护桶内的链表以及链表上缓冲区的元数据。
//! 命中时只需要目标桶的锁；未命中时先放开桶锁，再按
//! 驱逐锁 -> 目标桶 -> 其他桶（下标升序）的顺序加锁，
//! 在整个缓存中挑出最久未被使用的空闲缓冲区。
//! 只有持有驱逐锁的进程会同时持有多个桶锁。
//!
//! 使用方式：
//! * 调用 `bread` 取得某个块的缓冲区，返回时已加锁且内容有效；
//! * 修改数据后调用 `bwrite` 写回磁盘；
//! * 用完后调用 `brelse`（或直接丢弃 `Buf`），之后不能再使用它；
//! * 同一时刻只有一个进程能使用某个缓冲区，不要长时间持有。

use array_macro::array;

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU8, Ordering};

use crate::consts::fs::{BSIZE, NBUF, NR_HASH};
use crate::driver::BlockDevice;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::{SpinLock, SpinLockGuard};
use crate::trap::Clock;

bitflags! {
    /// 缓冲区状态
    pub struct BufFlags: u8 {
        /// 内容已从磁盘读入
        const VALID = 1 << 0;
        /// 自上次写回之后被修改过。
        ///
        /// 只供上层查询：驱逐不看这一位，也不会替调用者写回，
        /// 未经 `bwrite` 的修改在缓冲区被驱逐时直接丢失。
        const DIRTY = 1 << 1;
    }
}

/// 磁盘块的身份
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub dev: u32,
    pub blockno: u32,
}

impl BlockId {
    pub const fn new(dev: u32, blockno: u32) -> Self {
        Self { dev, blockno }
    }

    #[inline]
    fn bucket(&self) -> usize {
        (self.dev ^ self.blockno) as usize % NR_HASH
    }
}

/// 缓冲区句柄：缓存数组中的下标加上该缓冲区的代数。
///
/// 缓冲区每换一次身份，代数就加一，
/// 因此在缓冲区被回收之后继续使用旧句柄会被发现。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufId {
    index: usize,
    block: BlockId,
    generation: u32,
}

impl BufId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// 全局缓冲区缓存（Buffer Cache），位于文件系统与块设备驱动之间。
///
/// `Bcache` 提供了一个固定大小的缓冲区池，用于缓存磁盘块数据，
/// 以减少重复的磁盘访问，同时为多个进程访问同一个块提供同步点。
/// 缓冲区从不释放，只会原地换成另一个块的身份。
///
/// # 类型参数
/// - `N`: 缓冲区数量，默认为 `NBUF`。
pub struct Bcache<const N: usize = NBUF> {
    /// 驱逐锁，同一时刻只允许一个进程挑选并改写牺牲缓冲区。
    evict: SpinLock<()>,

    /// 散列桶，每个桶的锁保护桶内链表及链表上缓冲区的 `BufCtrl`。
    buckets: [SpinLock<Bucket>; NR_HASH],

    /// 缓冲区的元数据，由缓冲区当前所在桶的锁保护。
    ctrl: CtrlTable<N>,

    /// 缓冲区的数据，由各自的睡眠锁保护。
    bufs: [BufInner; N],

    disk: &'static dyn BlockDevice,

    clock: &'static dyn Clock,
}

impl<const N: usize> Bcache<N> {
    /// 创建缓存。所有缓冲区起初都没有身份，挂在 0 号桶上。
    pub const fn new(disk: &'static dyn BlockDevice, clock: &'static dyn Clock) -> Self {
        assert!(N > 0, "bcache: empty pool");
        Self {
            evict: SpinLock::new((), "bcache"),
            buckets: array![i => SpinLock::new(Bucket::new(i == 0), "bcache.bucket"); NR_HASH],
            ctrl: CtrlTable::new(),
            bufs: [const { BufInner::new() }; N],
            disk,
            clock,
        }
    }

    /// 取得块 `(dev, blockno)` 的缓冲区，返回时已持有它的睡眠锁。
    ///
    /// # 流程解释
    /// 1. 持有目标桶的锁查找缓存，命中则增加引用计数后返回；
    /// 2. 未命中则先释放目标桶的锁，再获取驱逐锁，然后重新获取目标桶的锁并再次查找，
    ///    因为在放开桶锁期间可能已有其他进程缓存了该块；
    /// 3. 仍未命中则按下标升序锁住其余所有桶，在整个缓存中找出引用计数为零、
    ///    时间戳最小的缓冲区（时间戳相同则取下标最小者）；
    /// 4. 把它从原来的桶中摘下，改写身份、标记为无效、引用计数置一，挂到目标桶上；
    /// 5. 按获取的逆序释放所有自旋锁，最后获取该缓冲区的睡眠锁。
    ///
    /// # 可能的错误
    /// 没有任何空闲缓冲区时 panic：缓冲区池是静态大小的，
    /// 耗尽说明调用者泄漏了缓冲区或者缓存配置过小。
    pub fn bget(&self, dev: u32, blockno: u32) -> Buf<'_, N> {
        let block = BlockId::new(dev, blockno);
        let key = block.bucket();

        let bucket = self.buckets[key].lock();
        if let Some(index) = unsafe { self.find_cached(&bucket, block) } {
            let generation = unsafe { self.ctrl.get(index) }.acquire_ref();
            drop(bucket);
            #[cfg(feature = "trace_bio")]
            println!("bcache: hit dev {} block {} buf {}", dev, blockno, index);
            return self.lock_buf(index, block, generation);
        }
        // 必须先放开桶锁再获取驱逐锁，否则与持有驱逐锁再拿桶锁的进程形成死锁
        drop(bucket);

        let evict = self.evict.lock();
        let bucket = self.buckets[key].lock();
        if let Some(index) = unsafe { self.find_cached(&bucket, block) } {
            let generation = unsafe { self.ctrl.get(index) }.acquire_ref();
            drop(bucket);
            drop(evict);
            #[cfg(feature = "trace_bio")]
            println!("bcache: raced hit dev {} block {} buf {}", dev, blockno, index);
            return self.lock_buf(index, block, generation);
        }

        // 挑选期间锁住所有桶，其他桶上的命中会短暂等待，换来精确的 LRU
        let mut held: [Option<SpinLockGuard<'_, Bucket>>; NR_HASH] = Default::default();
        held[key] = Some(bucket);
        for i in 0..NR_HASH {
            if i != key {
                held[i] = Some(self.buckets[i].lock());
            }
        }

        let victim = match unsafe { self.find_lru(&held) } {
            Some(index) => index,
            None => panic!("bget: no buffers"),
        };

        let old_key = unsafe { self.ctrl.get(victim) }.bucket;
        unsafe { self.unlink(held_mut(&mut held, old_key), victim) };
        let generation = {
            let b = unsafe { self.ctrl.get(victim) };
            b.block = Some(block);
            b.bucket = key;
            b.refcnt = 1;
            b.generation = b.generation.wrapping_add(1);
            b.generation
        };
        self.bufs[victim].flags.store(BufFlags::empty().bits(), Ordering::Relaxed);
        unsafe { self.link_front(held_mut(&mut held, key), victim) };

        #[cfg(feature = "trace_bio")]
        println!("bcache: evict buf {} (bucket {}) for dev {} block {}", victim, old_key, dev, blockno);

        for i in (0..NR_HASH).rev() {
            if i != key {
                drop(held[i].take());
            }
        }
        drop(held[key].take());
        drop(evict);

        self.lock_buf(victim, block, generation)
    }

    /// 返回一个已加锁、内容与磁盘一致的缓冲区
    pub fn bread(&self, dev: u32, blockno: u32) -> Buf<'_, N> {
        let mut b = self.bget(dev, blockno);
        b.read();
        b
    }

    /// 取消 `Buf::pin` 增加的引用，调用者不必持有该缓冲区。
    ///
    /// 句柄已过期（缓冲区换了身份）时 panic。
    /// 引用计数降到零时记录时间戳，缓冲区从此可以被驱逐。
    pub fn bunpin(&self, id: BufId) {
        self.unpin(id);
    }

    /// 块是否在缓存中
    pub fn is_cached(&self, dev: u32, blockno: u32) -> bool {
        self.refcnt(dev, blockno).is_some()
    }

    /// 块在缓存中时返回其引用计数
    pub fn refcnt(&self, dev: u32, blockno: u32) -> Option<usize> {
        let block = BlockId::new(dev, blockno);
        let bucket = self.buckets[block.bucket()].lock();
        let refcnt = unsafe { self.find_cached(&bucket, block).map(|i| self.ctrl.get(i).refcnt) };
        drop(bucket);
        refcnt
    }

    fn lock_buf(&self, index: usize, block: BlockId, generation: u32) -> Buf<'_, N> {
        Buf {
            cache: self,
            index,
            block,
            generation,
            data: ManuallyDrop::new(self.bufs[index].data.lock()),
            _not_send: PhantomData,
        }
    }

    /// 引用计数减一，降到零时记录时间戳
    fn brelse(&self, index: usize, block: BlockId) {
        let timestamp = self.clock.ticks();
        let bucket = self.buckets[block.bucket()].lock();
        let b = unsafe { self.ctrl.get(index) };
        if b.refcnt == 0 {
            panic!("brelse");
        }
        b.refcnt -= 1;
        if b.refcnt == 0 {
            b.timestamp = timestamp;
        }
        drop(bucket);
    }

    fn bpin(&self, index: usize, block: BlockId) {
        let bucket = self.buckets[block.bucket()].lock();
        let b = unsafe { self.ctrl.get(index) };
        b.pins += 1;
        b.refcnt += 1;
        drop(bucket);
    }

    /// 只能取消 `bpin` 增加的引用，持有者自己的引用由 `brelse` 归还
    fn unpin(&self, id: BufId) {
        let timestamp = self.clock.ticks();
        let bucket = self.buckets[id.block.bucket()].lock();
        // 只通过桶内链表确认身份，过期句柄指向的缓冲区可能已在别的桶里
        if unsafe { self.find_cached(&bucket, id.block) } != Some(id.index) {
            panic!("bunpin: stale buffer handle");
        }
        let b = unsafe { self.ctrl.get(id.index) };
        if b.generation != id.generation {
            panic!("bunpin: stale buffer handle");
        }
        if b.pins == 0 {
            panic!("bunpin: not pinned");
        }
        b.pins -= 1;
        b.refcnt -= 1;
        if b.refcnt == 0 {
            b.timestamp = timestamp;
        }
        drop(bucket);
    }

    /// 在桶中查找块。
    ///
    /// # 安全性
    /// `bucket` 必须是该块所属桶的锁守卫。
    unsafe fn find_cached(&self, bucket: &Bucket, block: BlockId) -> Option<usize> {
        let mut cur = bucket.head;
        while let Some(index) = cur {
            let b = self.ctrl.get(index);
            if b.block == Some(block) {
                return Some(index);
            }
            cur = b.next;
        }
        None
    }

    /// 在所有桶中找出引用计数为零、时间戳最小的缓冲区。
    ///
    /// # 安全性
    /// 所有桶的锁都必须由 `held` 持有。
    unsafe fn find_lru(&self, held: &[Option<SpinLockGuard<'_, Bucket>>; NR_HASH]) -> Option<usize> {
        let mut lru: Option<(usize, usize)> = None;
        for guard in held.iter() {
            let bucket = match guard.as_deref() {
                Some(bucket) => bucket,
                None => panic!("bget: bucket not held"),
            };
            let mut cur = bucket.head;
            while let Some(index) = cur {
                let b = self.ctrl.get(index);
                if b.refcnt == 0 && lru.map_or(true, |best| (b.timestamp, index) < best) {
                    lru = Some((b.timestamp, index));
                }
                cur = b.next;
            }
        }
        lru.map(|(_, index)| index)
    }

    /// # 安全性
    /// `bucket` 必须是 `index` 当前所在桶的锁守卫。
    unsafe fn unlink(&self, bucket: &mut Bucket, index: usize) {
        let (prev, next) = {
            let b = self.ctrl.get(index);
            let links = (b.prev, b.next);
            b.prev = None;
            b.next = None;
            links
        };
        match prev {
            Some(p) => self.ctrl.get(p).next = next,
            None => bucket.head = next,
        }
        if let Some(n) = next {
            self.ctrl.get(n).prev = prev;
        }
    }

    /// # 安全性
    /// `bucket` 必须是目标桶的锁守卫，且 `index` 不在任何链表上。
    unsafe fn link_front(&self, bucket: &mut Bucket, index: usize) {
        let old_head = bucket.head;
        {
            let b = self.ctrl.get(index);
            b.prev = None;
            b.next = old_head;
        }
        if let Some(h) = old_head {
            self.ctrl.get(h).prev = Some(index);
        }
        bucket.head = Some(index);
    }

    /// 缓存中身份为 `block` 的缓冲区个数
    #[cfg(test)]
    fn resident_copies(&self, block: BlockId) -> usize {
        let _evict = self.evict.lock();
        let mut copies = 0;
        for bucket in self.buckets.iter() {
            let bucket = bucket.lock();
            let mut cur = bucket.head;
            while let Some(index) = cur {
                let b = unsafe { self.ctrl.get(index) };
                if b.block == Some(block) {
                    copies += 1;
                }
                cur = b.next;
            }
        }
        copies
    }
}

fn held_mut<'g>(held: &'g mut [Option<SpinLockGuard<'_, Bucket>>; NR_HASH], key: usize) -> &'g mut Bucket {
    match held[key].as_deref_mut() {
        Some(bucket) => bucket,
        None => panic!("bget: bucket {} not held", key),
    }
}

/// 已加锁的缓冲区。
///
/// 丢弃时先释放睡眠锁，再把引用计数减一。
/// 持有者是加锁的进程，不能交给其他进程释放。
pub struct Buf<'a, const N: usize = NBUF> {
    cache: &'a Bcache<N>,
    index: usize,
    block: BlockId,
    generation: u32,
    data: ManuallyDrop<SleepLockGuard<'a, BufData>>,
    _not_send: PhantomData<*mut ()>,
}

impl<'a, const N: usize> Buf<'a, N> {
    pub fn dev(&self) -> u32 {
        self.block.dev
    }

    pub fn blockno(&self) -> u32 {
        self.block.blockno
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn id(&self) -> BufId {
        BufId {
            index: self.index,
            block: self.block,
            generation: self.generation,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(BufFlags::VALID)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(BufFlags::DIRTY)
    }

    /// 内容无效时从磁盘读入，然后返回数据
    pub fn read(&mut self) -> &BufData {
        if !self.is_valid() {
            let disk = self.cache.disk;
            disk.rw(self.block, &mut self.data, false);
            self.inner().flags.fetch_or(BufFlags::VALID.bits(), Ordering::Relaxed);
        }
        &self.data
    }

    pub fn data(&self) -> &BufData {
        &self.data
    }

    /// 可变地访问数据，缓冲区被标记为脏
    pub fn data_mut(&mut self) -> &mut BufData {
        self.inner().flags.fetch_or(BufFlags::DIRTY.bits(), Ordering::Relaxed);
        &mut self.data
    }

    /// 把缓冲区的内容写回磁盘，必须持有该缓冲区的锁
    pub fn bwrite(&mut self) {
        if !self.inner().data.holding() {
            panic!("bwrite");
        }
        let disk = self.cache.disk;
        disk.rw(self.block, &mut self.data, true);
        self.inner().flags.fetch_and(!BufFlags::DIRTY.bits(), Ordering::Relaxed);
    }

    /// 增加引用计数，使缓冲区在释放之后仍然留在缓存中
    pub fn pin(&self) {
        self.cache.bpin(self.index, self.block);
    }

    /// 取消一次 `pin`，不能取消本句柄自身持有的那一个引用
    pub fn unpin(&self) {
        self.cache.unpin(self.id());
    }

    /// 释放缓冲区，等同于丢弃它
    pub fn brelse(self) {
        drop(self);
    }

    fn inner(&self) -> &'a BufInner {
        &self.cache.bufs[self.index]
    }

    fn flags(&self) -> BufFlags {
        BufFlags::from_bits_truncate(self.inner().flags.load(Ordering::Relaxed))
    }
}

impl<'a, const N: usize> Drop for Buf<'a, N> {
    fn drop(&mut self) {
        if !self.inner().data.holding() {
            panic!("brelse");
        }
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.brelse(self.index, self.block);
    }
}

struct Bucket {
    head: Option<usize>,
}

impl Bucket {
    const fn new(first: bool) -> Self {
        Self {
            head: if first { Some(0) } else { None },
        }
    }
}

struct BufCtrl {
    /// 当前缓存的块，`None` 表示从未使用过
    block: Option<BlockId>,
    /// 所在桶的下标
    bucket: usize,
    /// 持有者与固定次数之和
    refcnt: usize,
    /// 其中由 `bpin` 增加、尚未取消的部分
    pins: usize,
    /// 引用计数最近一次降到零的时刻
    timestamp: usize,
    generation: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

impl BufCtrl {
    const fn new(index: usize, n: usize) -> Self {
        Self {
            block: None,
            bucket: 0,
            refcnt: 0,
            pins: 0,
            timestamp: 0,
            generation: 0,
            prev: if index == 0 { None } else { Some(index - 1) },
            next: if index + 1 < n { Some(index + 1) } else { None },
        }
    }

    fn acquire_ref(&mut self) -> u32 {
        self.refcnt += 1;
        self.generation
    }
}

struct CtrlTable<const N: usize>([UnsafeCell<BufCtrl>; N]);

// 每个 BufCtrl 只在持有它所在桶的锁时访问
unsafe impl<const N: usize> Sync for CtrlTable<N> {}

impl<const N: usize> CtrlTable<N> {
    /// 把所有缓冲区按下标顺序串成 0 号桶上的链表
    const fn new() -> Self {
        let mut table = [const { UnsafeCell::new(BufCtrl::new(0, 1)) }; N];
        let mut i = 0;
        while i < N {
            table[i] = UnsafeCell::new(BufCtrl::new(i, N));
            i += 1;
        }
        Self(table)
    }

    /// # 安全性
    /// 调用者必须持有 `index` 当前所在桶的锁，且同一时刻不能有另一个指向它的引用。
    #[allow(clippy::mut_from_ref)]
    unsafe fn get(&self, index: usize) -> &mut BufCtrl {
        &mut *self.0[index].get()
    }
}

struct BufInner {
    flags: AtomicU8,
    data: SleepLock<BufData>,
}

impl BufInner {
    const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            data: SleepLock::new(BufData::new(), "buffer"),
        }
    }
}

/// 一个磁盘块的数据
#[repr(C, align(8))]
pub struct BufData([u8; BSIZE]);

impl BufData {
    pub const fn new() -> Self {
        Self([0; BSIZE])
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RamDisk;
    use crate::trap::{clock_intr, TICKS_CLOCK};
    use std::thread;

    /// 块 i 的每个字节都是 i + 1
    fn disk(dev: u32, nblocks: usize) -> &'static RamDisk {
        let image = Box::leak(vec![0u8; nblocks * BSIZE].into_boxed_slice());
        for (i, block) in image.chunks_mut(BSIZE).enumerate() {
            block.fill(i as u8 + 1);
        }
        Box::leak(Box::new(RamDisk::new(dev, image)))
    }

    fn filled_with(data: &BufData, byte: u8) -> bool {
        data.iter().all(|&b| b == byte)
    }

    #[test]
    fn bread_hits_cache_after_first_read() {
        let disk = disk(1, 16);
        let cache: Bcache<4> = Bcache::new(disk, &TICKS_CLOCK);

        let b = cache.bread(1, 3);
        assert!(b.is_valid());
        assert!(filled_with(b.data(), 4));
        let first = b.id();
        b.brelse();

        let b = cache.bread(1, 3);
        assert_eq!(b.id(), first);
        assert_eq!(disk.reads(), 1);
        assert_eq!(cache.refcnt(1, 3), Some(1));
        drop(b);
        assert_eq!(cache.refcnt(1, 3), Some(0));
    }

    #[test]
    fn bget_of_new_block_is_invalid() {
        let disk = disk(1, 16);
        let cache: Bcache<4> = Bcache::new(disk, &TICKS_CLOCK);

        let mut b = cache.bget(1, 7);
        assert!(!b.is_valid());
        assert_eq!(disk.reads(), 0);
        assert!(filled_with(b.read(), 8));
        assert_eq!(disk.reads(), 1);
        b.read();
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn evicts_least_recently_released() {
        // 保证第一次释放的时间戳大于未使用缓冲区的 0
        clock_intr();
        let disk = disk(0, 8);
        let cache: Bcache<3> = Bcache::new(disk, &TICKS_CLOCK);
        let (a, b, c, d) = (1, 2, 3, 4);

        let buf_a = cache.bread(0, a);
        let slot_a = buf_a.id().index();
        drop(buf_a);
        clock_intr();
        let buf_b = cache.bread(0, b);
        drop(buf_b);
        clock_intr();

        let buf_c = cache.bread(0, c);
        let c_id = buf_c.id();

        let buf_d = cache.bread(0, d);
        assert_eq!(buf_d.id().index(), slot_a);
        assert!(filled_with(buf_d.data(), d as u8 + 1));
        assert!(!cache.is_cached(0, a));
        assert!(cache.is_cached(0, b));

        assert_eq!(buf_c.id(), c_id);
        assert!(filled_with(buf_c.data(), c as u8 + 1));
        assert_eq!(cache.refcnt(0, c), Some(1));
    }

    #[test]
    fn ties_break_on_lowest_index() {
        let disk = disk(0, 8);
        let cache: Bcache<3> = Bcache::new(disk, &TICKS_CLOCK);
        let b = cache.bget(0, 5);
        assert_eq!(b.id().index(), 0);
        let c = cache.bget(0, 6);
        assert_eq!(c.id().index(), 1);
    }

    #[test]
    fn pinned_buffer_survives_release() {
        clock_intr();
        let disk = disk(0, 8);
        let cache: Bcache<2> = Bcache::new(disk, &TICKS_CLOCK);

        let b = cache.bread(0, 1);
        b.pin();
        let pinned = b.id();
        drop(b);
        assert_eq!(cache.refcnt(0, 1), Some(1));

        clock_intr();
        cache.bread(0, 2).brelse();
        clock_intr();
        // 只有块 2 的缓冲区可以被驱逐
        cache.bread(0, 3).brelse();
        assert!(cache.is_cached(0, 1));
        assert!(!cache.is_cached(0, 2));

        clock_intr();
        cache.bunpin(pinned);
        assert_eq!(cache.refcnt(0, 1), Some(0));
        clock_intr();
        // 块 3 比刚解除固定的块 1 更早被释放
        cache.bread(0, 4).brelse();
        assert!(cache.is_cached(0, 1));
        clock_intr();
        cache.bread(0, 5).brelse();
        assert!(!cache.is_cached(0, 1));
    }

    #[test]
    fn pin_and_unpin_while_held() {
        let disk = disk(0, 8);
        let cache: Bcache<2> = Bcache::new(disk, &TICKS_CLOCK);
        let b = cache.bread(0, 1);
        b.pin();
        assert_eq!(cache.refcnt(0, 1), Some(2));
        b.unpin();
        assert_eq!(cache.refcnt(0, 1), Some(1));
    }

    #[test]
    #[should_panic(expected = "bunpin: not pinned")]
    fn unpin_cannot_drop_own_reference() {
        let disk = disk(0, 8);
        let cache: Bcache<2> = Bcache::new(disk, &TICKS_CLOCK);
        let b = cache.bread(0, 1);
        b.unpin();
    }

    #[test]
    #[should_panic(expected = "bunpin: not pinned")]
    fn bunpin_without_pin() {
        let disk = disk(0, 8);
        let cache: Bcache<1> = Bcache::new(disk, &TICKS_CLOCK);
        let b = cache.bread(0, 1);
        cache.bunpin(b.id());
    }

    #[test]
    fn waiter_reference_is_not_a_pin() {
        let disk = disk(0, 8);
        let cache: Bcache<2> = Bcache::new(disk, &TICKS_CLOCK);
        let b = cache.bread(0, 1);
        thread::scope(|s| {
            let waiter = s.spawn(|| cache.bread(0, 1).blockno());
            while cache.refcnt(0, 1) != Some(2) {
                thread::yield_now();
            }
            // 等待者的引用不能被 unpin 拿走
            let unpinned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| b.unpin()));
            assert!(unpinned.is_err());
            assert_eq!(cache.refcnt(0, 1), Some(2));
            drop(b);
            assert_eq!(waiter.join().unwrap(), 1);
        });
        assert_eq!(cache.refcnt(0, 1), Some(0));
    }

    #[test]
    #[should_panic(expected = "bunpin: stale buffer handle")]
    fn unpin_with_stale_handle() {
        let disk = disk(0, 8);
        let cache: Bcache<1> = Bcache::new(disk, &TICKS_CLOCK);
        let id = cache.bread(0, 1).id();
        cache.bread(0, 2).brelse();
        cache.bunpin(id);
    }

    #[test]
    #[should_panic(expected = "bunpin: stale buffer handle")]
    fn unpin_after_block_came_back() {
        let disk = disk(0, 8);
        let cache: Bcache<1> = Bcache::new(disk, &TICKS_CLOCK);
        let id = cache.bread(0, 1).id();
        cache.bread(0, 2).brelse();
        let again = cache.bread(0, 1);
        assert_eq!(again.id().index(), id.index());
        assert_ne!(again.id().generation(), id.generation());
        again.pin();
        drop(again);
        cache.bunpin(id);
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn exhausted_pool_panics() {
        let disk = disk(0, 8);
        let cache: Bcache<2> = Bcache::new(disk, &TICKS_CLOCK);
        let _a = cache.bget(0, 1);
        let _b = cache.bget(0, 2);
        let _c = cache.bget(0, 3);
    }

    #[test]
    fn cycling_more_blocks_than_buffers() {
        let disk = disk(0, 8);
        let cache: Bcache<4> = Bcache::new(disk, &TICKS_CLOCK);
        for _ in 0..3 {
            for blockno in 0..5 {
                clock_intr();
                let b = cache.bread(0, blockno);
                assert!(filled_with(b.data(), blockno as u8 + 1));
            }
        }
        // 按 LRU 轮转五个块，四个缓冲区每次都不命中
        assert_eq!(disk.reads(), 15);
    }

    #[test]
    fn bwrite_reaches_disk_and_survives_eviction() {
        let disk = disk(0, 8);
        let cache: Bcache<1> = Bcache::new(disk, &TICKS_CLOCK);

        let mut b = cache.bread(0, 2);
        assert!(!b.is_dirty());
        b.data_mut()[0] = 42;
        assert!(b.is_dirty());
        b.bwrite();
        assert!(!b.is_dirty());
        assert_eq!(disk.writes(), 1);
        drop(b);

        let mut raw = [0u8; BSIZE];
        disk.peek(2, &mut raw);
        assert_eq!(raw[0], 42);
        assert_eq!(raw[1], 3);

        cache.bread(0, 3).brelse();
        let b = cache.bread(0, 2);
        assert_eq!(b.data()[0], 42);
        assert_eq!(disk.reads(), 3);
    }

    #[test]
    fn dirty_buffer_is_evicted_without_writeback() {
        let disk = disk(0, 8);
        let cache: Bcache<1> = Bcache::new(disk, &TICKS_CLOCK);

        let mut b = cache.bread(0, 2);
        b.data_mut()[0] = 42;
        assert!(b.is_dirty());
        drop(b);

        let b = cache.bread(0, 3);
        assert!(!b.is_dirty());
        drop(b);
        assert_eq!(disk.writes(), 0);

        let b = cache.bread(0, 2);
        assert!(filled_with(b.data(), 3));
    }

    #[test]
    fn devices_do_not_alias() {
        struct TwoDisks(&'static RamDisk, &'static RamDisk);
        impl BlockDevice for TwoDisks {
            fn rw(&self, block: BlockId, data: &mut BufData, writing: bool) {
                match block.dev {
                    1 => self.0.rw(block, data, writing),
                    _ => self.1.rw(block, data, writing),
                }
            }
        }
        let disks: &'static TwoDisks = Box::leak(Box::new(TwoDisks(disk(1, 4), disk(2, 4))));
        disks.1.rw(BlockId::new(2, 1), &mut BufData::new(), true);

        let cache: Bcache<4> = Bcache::new(disks, &TICKS_CLOCK);
        let one = cache.bread(1, 1);
        let two = cache.bread(2, 1);
        assert_ne!(one.id().index(), two.id().index());
        assert!(filled_with(one.data(), 2));
        assert!(filled_with(two.data(), 0));
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 50;
        let disk = disk(0, 64);
        let cache: Bcache = Bcache::new(disk, &TICKS_CLOCK);

        let mut b = cache.bread(0, 0);
        b.data_mut()[..4].copy_from_slice(&0u32.to_le_bytes());
        b.bwrite();
        drop(b);

        thread::scope(|s| {
            for t in 0..THREADS {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..ROUNDS {
                        let mut b = cache.bread(0, 0);
                        let mut word = [0u8; 4];
                        word.copy_from_slice(&b.data()[..4]);
                        let v = u32::from_le_bytes(word) + 1;
                        b.data_mut()[..4].copy_from_slice(&v.to_le_bytes());
                        b.bwrite();
                        drop(b);

                        clock_intr();
                        let other = 1 + ((t * 7 + i) % 40) as u32;
                        let b = cache.bread(0, other);
                        assert!(filled_with(b.data(), other as u8 + 1));
                    }
                });
            }
        });

        let b = cache.bread(0, 0);
        let mut word = [0u8; 4];
        word.copy_from_slice(&b.data()[..4]);
        assert_eq!(u32::from_le_bytes(word), (THREADS * ROUNDS) as u32);
        drop(b);

        let mut raw = [0u8; BSIZE];
        disk.peek(0, &mut raw);
        assert_eq!(&raw[..4], &((THREADS * ROUNDS) as u32).to_le_bytes());

        for blockno in 0..41 {
            assert!(cache.resident_copies(BlockId::new(0, blockno)) <= 1);
        }
    }

    #[test]
    fn racing_misses_share_one_buffer() {
        let disk = disk(0, 8);
        let cache: Bcache<8> = Bcache::new(disk, &TICKS_CLOCK);
        thread::scope(|s| {
            for _ in 0..6 {
                s.spawn(|| {
                    for _ in 0..20 {
                        let b = cache.bread(0, 5);
                        assert!(filled_with(b.data(), 6));
                    }
                });
            }
        });
        assert_eq!(cache.resident_copies(BlockId::new(0, 5)), 1);
        assert_eq!(disk.reads(), 1);
    }
}
