//! Serial console backend
//!
//! On bare-metal x86_64 this drives the 16550A UART at COM1. On the host
//! target the same entry point writes to standard output so kernel messages
//! show up in test runs.

use core::fmt;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod port {
    use lazy_static::lazy_static;
    use spin::Mutex;
    use uart_16550::SerialPort;

    const COM1: u16 = 0x3F8;

    lazy_static! {
        pub static ref SERIAL1: Mutex<SerialPort> = {
            // SAFETY: COM1 is the standard ISA serial port; the port range is
            // not claimed by anything else in the kernel.
            let mut serial_port = unsafe { SerialPort::new(COM1) };
            serial_port.init();
            Mutex::new(serial_port)
        };
    }
}

/// Write formatted output to the console backend.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        use core::fmt::Write;
        port::SERIAL1.lock().write_fmt(args).ok();
    }

    #[cfg(not(target_os = "none"))]
    {
        use std::io::Write;
        std::io::stdout().write_fmt(args).ok();
    }

    #[cfg(all(not(target_arch = "x86_64"), target_os = "none"))]
    {
        let _ = args;
    }
}
