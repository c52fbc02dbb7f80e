//! 时钟
//!
//! 时钟中断累加全局的 `TICKS`，缓存层用它给缓冲区打上最近一次释放的时间戳。
//! `TICKS` 有自己独立的锁，读取它不会与缓存的锁产生先后顺序上的耦合。

use core::num::Wrapping;

use crate::process;
use crate::spinlock::SpinLock;

static TICKS: SpinLock<Wrapping<usize>> = SpinLock::new(Wrapping(0), "time");

/// 单调递增的逻辑时钟
pub trait Clock: Sync {
    fn ticks(&self) -> usize;
}

/// 以全局 `TICKS` 为来源的时钟
pub struct Ticks;

pub static TICKS_CLOCK: Ticks = Ticks;

impl Clock for Ticks {
    fn ticks(&self) -> usize {
        ticks()
    }
}

/// 处理时钟中断（更新全局计数器）
///
/// 增加全局时钟计数并唤醒等待时钟的进程。
/// 由时钟中断处理程序调用。
pub fn clock_intr() {
    let mut guard = TICKS.lock();
    *guard += Wrapping(1);
    process::wakeup(&TICKS as *const _ as usize);
    drop(guard);
}

/// 系统启动以来的时钟周期数
pub fn ticks() -> usize {
    TICKS.lock().0
}
