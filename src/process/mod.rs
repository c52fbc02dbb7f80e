//! 进程与 CPU 挂钩
//!
//! 锁需要知道当前运行在哪个硬件线程上、当前是哪个进程，
//! 睡眠锁还需要让进程在某个通道上休眠并被唤醒。这些能力属于调度器，
//! 由内核在启动时通过 [`set_scheduler`] 注册进来。

use core::cell::UnsafeCell;
use core::hint;

use crate::spinlock::SpinLockGuard;

#[cfg(test)]
mod host;

/// 调度器需要向锁提供的能力。
pub trait Scheduler: Sync {
    /// 当前硬件线程的编号。
    fn cpu_id(&self) -> usize;

    /// 当前进程的编号，睡眠锁用它记录持有者。
    fn pid(&self) -> usize;

    /// 关闭中断，可以嵌套。
    fn push_off(&self);

    /// 与 `push_off` 配对，嵌套层数归零时恢复原先的中断状态。
    fn pop_off(&self);

    /// 在 `channel` 上休眠。
    ///
    /// 实现必须先保证不会错过唤醒，再释放 `guard`。
    /// 允许虚假唤醒：调用者总会在醒来后重新检查条件。
    fn sleep(&self, channel: usize, guard: SpinLockGuard<'_, ()>);

    /// 唤醒所有在 `channel` 上休眠的进程。
    fn wakeup(&self, channel: usize);
}

/// 启动阶段的调度器：只有一个硬件线程，没有其他进程可以切换。
struct BootHart;

impl Scheduler for BootHart {
    fn cpu_id(&self) -> usize {
        0
    }

    fn pid(&self) -> usize {
        0
    }

    fn push_off(&self) {}

    fn pop_off(&self) {}

    fn sleep(&self, _channel: usize, guard: SpinLockGuard<'_, ()>) {
        drop(guard);
        hint::spin_loop();
    }

    fn wakeup(&self, _channel: usize) {}
}

struct SchedulerSlot(UnsafeCell<Option<&'static dyn Scheduler>>);

// 只在启动阶段、其他硬件线程开始运行之前写入
unsafe impl Sync for SchedulerSlot {}

static SCHEDULER: SchedulerSlot = SchedulerSlot(UnsafeCell::new(None));

#[cfg(not(test))]
static DEFAULT: BootHart = BootHart;

#[cfg(test)]
static DEFAULT: host::HostScheduler = host::HostScheduler;

/// 注册内核的调度器。
///
/// # 安全性
/// 必须在其他硬件线程启动之前、任何锁被使用之前调用，且只调用一次。
pub unsafe fn set_scheduler(scheduler: &'static dyn Scheduler) {
    *SCHEDULER.0.get() = Some(scheduler);
}

#[inline]
fn scheduler() -> &'static dyn Scheduler {
    match unsafe { *SCHEDULER.0.get() } {
        Some(s) => s,
        None => &DEFAULT,
    }
}

#[inline]
pub fn cpu_id() -> usize {
    scheduler().cpu_id()
}

#[inline]
pub fn my_pid() -> usize {
    scheduler().pid()
}

#[inline]
pub fn push_off() {
    scheduler().push_off()
}

#[inline]
pub fn pop_off() {
    scheduler().pop_off()
}

pub fn sleep(channel: usize, guard: SpinLockGuard<'_, ()>) {
    scheduler().sleep(channel, guard)
}

pub fn wakeup(channel: usize) {
    scheduler().wakeup(channel)
}
