//! 空闲页链表
//!
//! 链表节点就放在空闲页自身的开头，不占用额外内存。

use core::ptr;

#[repr(C)]
struct Run {
    next: *mut Run,
}

pub struct RunList {
    head: *mut Run,
}

impl RunList {
    pub const fn new() -> Self {
        Self { head: ptr::null_mut() }
    }

    /// 把以 `raw_addr` 开头的空闲页压入链表
    ///
    /// # 安全性
    /// `raw_addr` 必须指向一块可写、不再被他人使用、按指针对齐的内存。
    pub unsafe fn push(&mut self, raw_addr: usize) {
        let run = raw_addr as *mut Run;
        ptr::write(run, Run { next: self.head });
        self.head = run;
    }

    /// 弹出链表头部的空闲页
    ///
    /// # 安全性
    /// 链表中的每个节点都必须仍然是 `push` 写入的内容。
    pub unsafe fn pop(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let run = self.head;
        self.head = (*run).next;
        Some(run as usize)
    }

    /// 链表头部的空闲页，不弹出
    pub fn peek(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.head as usize)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}
