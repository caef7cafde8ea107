// Print macros for kernel console output

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::arch::aarch64::serial::_print(format_args!($($arg)*)));
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

// Host builds (unit tests) have no UART; evaluate the arguments so that
// expressions keep their side effects, then discard the output.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
#[macro_export]
macro_rules! println {
    () => {};
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}
