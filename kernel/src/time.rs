//! Monotonic time source
//!
//! Accounting records, throttles, and the log ring all stamp events with
//! microseconds from [`monotonic_us`]. On bare metal the value is derived
//! from the TSC scaled by a boot-calibrated frequency; on the host it is
//! measured from process start. The TSC is the only monotonic source that is
//! always available before timer infrastructure comes up.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use core::sync::atomic::{AtomicU64, Ordering};

/// Assumed TSC frequency until boot calibration runs (cycles per µs).
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
static TSC_CYCLES_PER_US: AtomicU64 = AtomicU64::new(1_000);

/// Record the calibrated TSC frequency, in cycles per microsecond.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn set_tsc_frequency(cycles_per_us: u64) {
    if cycles_per_us > 0 {
        TSC_CYCLES_PER_US.store(cycles_per_us, Ordering::Release);
    }
}

/// Microseconds from an arbitrary but fixed origin. Monotonic.
pub fn monotonic_us() -> u64 {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        // SAFETY: RDTSC is unprivileged and has no memory effects.
        let tsc = unsafe { core::arch::x86_64::_rdtsc() };
        tsc / TSC_CYCLES_PER_US.load(Ordering::Acquire)
    }

    #[cfg(not(target_os = "none"))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;

        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        origin.elapsed().as_micros() as u64
    }

    #[cfg(all(not(target_arch = "x86_64"), target_os = "none"))]
    {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_regresses() {
        let a = monotonic_us();
        let b = monotonic_us();
        assert!(b >= a);
    }
}
