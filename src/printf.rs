//! 定义系统内核的输出方法

use core::fmt;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// 是否已有硬件线程进入 panic
pub static PANICKED: AtomicBool = AtomicBool::new(false);

/// 控制台的单字符输出函数，为空表示尚未注册
static CONSOLE: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// 注册控制台的单字符输出函数（通常是串口驱动的 putc）。
///
/// 注册之前的输出会被丢弃。
pub fn set_console(putc: fn(u8)) {
    CONSOLE.store(putc as *mut (), Ordering::Release);
}

fn console() -> Option<fn(u8)> {
    let raw = CONSOLE.load(Ordering::Acquire);
    if raw.is_null() {
        None
    } else {
        // 只有 set_console 会写入，写入的一定是 fn(u8)
        Some(unsafe { mem::transmute::<*mut (), fn(u8)>(raw) })
    }
}

struct Print(Option<fn(u8)>);

impl fmt::Write for Print {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(putc) = self.0 {
            s.bytes().for_each(putc);
        }
        Ok(())
    }
}

/// 核心打印函数（被宏调用）
///
/// 系统处于 panic 状态时不加锁直接输出，
/// 正常状态下使用自旋锁保证多核输出不交错。
#[cfg(not(test))]
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    use crate::spinlock::SpinLock;
    static PRINT: SpinLock<()> = SpinLock::new((), "print");

    if PANICKED.load(Ordering::Relaxed) {
        // no need to lock
        let _ = Print(console()).write_fmt(args);
    } else {
        let guard = PRINT.lock();
        let _ = Print(console()).write_fmt(args);
        drop(guard);
    }
}

/// 测试在宿主机上运行，输出交给测试框架捕获
#[cfg(test)]
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;

    std::print!("{}", args);
    let _ = Print(console()).write_fmt(args);
}

/// 在终端输出一串字符
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*));
    };
}

/// 在终端输出一行字符
#[macro_export]
macro_rules! println {
    () => {$crate::print!("\n")};
    ($fmt:expr) => {$crate::print!(concat!($fmt, "\n"))};
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}

/// 全局panic处理函数
///
/// 打印panic信息，设置全局panic状态，然后让当前硬件线程停在原地。
#[cfg(all(not(test), feature = "kernel_panic"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    crate::println!("{}", info);
    PANICKED.store(true, Ordering::Relaxed);
    loop {
        core::hint::spin_loop();
    }
}
