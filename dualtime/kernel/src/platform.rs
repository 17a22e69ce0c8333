//! Platform services on Cortex-M.

pub use dualtime_timer::Platform;

#[cfg(target_arch = "arm")]
pub use cortex::{CortexMPlatform, Oscillator};

#[cfg(target_arch = "arm")]
mod cortex {
    use core::convert::Infallible;

    use cortex_m::peripheral::SCB;

    use super::Platform;

    /// Control of the high-frequency oscillator, specific to the clock tree
    /// of each part.
    pub trait Oscillator {
        fn stop(&mut self);

        fn start(&mut self);

        fn is_ready(&self) -> bool;
    }

    /// A Cortex-M core with its deep-sleep bit and reset request.
    pub struct CortexMPlatform<O> {
        scb: SCB,
        oscillator: O,
    }

    impl<O: Oscillator> CortexMPlatform<O> {
        pub fn new(scb: SCB, oscillator: O) -> Self {
            Self { scb, oscillator }
        }
    }

    impl<O: Oscillator> Platform for CortexMPlatform<O> {
        fn wait_for_interrupt(&mut self) {
            cortex_m::asm::wfi();
        }

        fn enter_deep_sleep(&mut self) {
            self.scb.set_sleepdeep();
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
            self.scb.clear_sleepdeep();
        }

        fn stop_high_frequency(&mut self) {
            self.oscillator.stop();
        }

        fn start_high_frequency(&mut self) {
            self.oscillator.start();
        }

        fn poll_high_frequency_ready(&mut self) -> nb::Result<(), Infallible> {
            if self.oscillator.is_ready() {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            }
        }

        fn reboot(&mut self) {
            SCB::sys_reset();
        }
    }
}
