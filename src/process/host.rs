//! 宿主机上的调度器：每个 OS 线程同时充当一个硬件线程和一个进程

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use super::Scheduler;
use crate::spinlock::SpinLockGuard;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static ID: usize = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    static NOFF: Cell<usize> = Cell::new(0);
}

pub struct HostScheduler;

impl Scheduler for HostScheduler {
    fn cpu_id(&self) -> usize {
        ID.with(|id| *id)
    }

    fn pid(&self) -> usize {
        ID.with(|id| *id)
    }

    fn push_off(&self) {
        NOFF.with(|n| n.set(n.get() + 1));
    }

    fn pop_off(&self) {
        NOFF.with(|n| match n.get().checked_sub(1) {
            Some(v) => n.set(v),
            None => panic!("pop_off(): count not match"),
        });
    }

    fn sleep(&self, _channel: usize, guard: SpinLockGuard<'_, ()>) {
        drop(guard);
        thread::yield_now();
    }

    fn wakeup(&self, _channel: usize) {}
}
