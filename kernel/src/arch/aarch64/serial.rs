//! Console output over the external MMIO UART driver
//!
//! The driver itself is an external collaborator; it hands received bytes to
//! [`crate::console::on_receive`] from its IRQ path and exposes a blocking
//! byte writer to us.

use core::fmt;

extern "C" {
    /// Blocking write of one byte to the UART. Provided by the driver.
    fn uart_putc(byte: u8);
}

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if b == b'\n' {
                // SAFETY: driver entry point, callable any time after boot.
                unsafe { uart_putc(b'\r') };
            }
            // SAFETY: as above.
            unsafe { uart_putc(b) };
        }
        Ok(())
    }
}

/// Backend of the `print!`/`println!` macros. Single core, IRQs masked in
/// every caller, so no lock is needed around the writer.
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = Writer.write_fmt(args);
}
