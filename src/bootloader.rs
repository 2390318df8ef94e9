//! Bootloader runtime.
//!
//! Binds the [`Engine`] to a TWI slave peripheral, the boot timer and the status
//! LEDs, and hands control to the application once the engine leaves the
//! bootloader state. Hardware specifics live behind [`TwiSlave`] and [`Handoff`].

use embedded_hal::digital::v2::{OutputPin, ToggleableOutputPin};

use crate::device::{BootState, DeviceConfig, Engine, Response, TargetMemory, TwiEvent};

/// TWI peripheral in slave mode.
pub trait TwiSlave {
    type Error;

    /// Fetch the pending status code and data register, `WouldBlock` while the
    /// interrupt flag is clear
    fn status(&mut self) -> nb::Result<(u8, u8), Self::Error>;

    /// Apply a response and clear the interrupt flag
    fn respond(&mut self, response: Response) -> Result<(), Self::Error>;

    /// Disable the peripheral, keeping the configured slave address
    fn disable(&mut self);
}

/// Transfer of control to the application.
pub trait Handoff {
    /// Stop the boot timer, move the interrupt vectors back to the application
    /// section and jump to its reset vector
    fn start_application(self) -> !;
}

pub struct Bootloader<T, M, R, A> {
    engine: Engine,
    twi: T,
    memory: M,
    run_led: R,
    activity_led: A,
}

impl<T, M, R, A> Bootloader<T, M, R, A>
where
    T: TwiSlave,
    M: TargetMemory,
    R: OutputPin + ToggleableOutputPin,
    A: OutputPin,
{
    pub fn new(config: DeviceConfig, twi: T, memory: M, run_led: R, activity_led: A) -> Self {
        Self {
            engine: Engine::new(config),
            twi,
            memory,
            run_led,
            activity_led,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn state(&self) -> BootState {
        self.engine.state()
    }

    /// Handle one pending TWI event, for use from the TWI interrupt or a poll loop
    pub fn poll(&mut self) -> nb::Result<(), T::Error> {
        let (status, data) = self.twi.status()?;

        let response = match TwiEvent::from_status(status, data) {
            Some(event) => {
                self.indicate(event);
                self.engine.handle(event, &mut self.memory)
            }
            None => Response::Ack,
        };

        self.twi.respond(response).map_err(nb::Error::Other)
    }

    /// Boot timer period elapsed
    pub fn tick(&mut self) -> BootState {
        let _ = self.run_led.toggle();
        self.engine.tick()
    }

    /// Serve the bus until the application is to be started, then hand over.
    ///
    /// `tick` reports whether a boot timer period has elapsed since the last call.
    pub fn run<F, H>(mut self, mut tick: F, handoff: H) -> !
    where
        F: FnMut() -> bool,
        H: Handoff,
    {
        while self.engine.state() == BootState::BootloaderActive {
            if tick() {
                self.tick();
            }

            match self.poll() {
                Ok(()) | Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(_)) => {
                    let _ = self.twi.respond(Response::ResetBus);
                }
            }
        }

        self.twi.disable();
        let _ = self.run_led.set_low();
        let _ = self.activity_led.set_low();

        handoff.start_application()
    }

    fn indicate(&mut self, event: TwiEvent) {
        let _ = match event {
            TwiEvent::AddressedWrite | TwiEvent::AddressedRead => self.activity_led.set_high(),
            TwiEvent::Stop | TwiEvent::ReadDone => self.activity_led.set_low(),
            _ => Ok(()),
        };
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::sim::RamTarget;
    use core::convert::Infallible;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeTwi {
        pending: VecDeque<(u8, u8)>,
        responses: Vec<Response>,
        disabled: bool,
    }

    impl FakeTwi {
        fn with(statuses: &[(u8, u8)]) -> Self {
            Self {
                pending: statuses.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl TwiSlave for FakeTwi {
        type Error = Infallible;

        fn status(&mut self) -> nb::Result<(u8, u8), Infallible> {
            self.pending.pop_front().ok_or(nb::Error::WouldBlock)
        }

        fn respond(&mut self, response: Response) -> Result<(), Infallible> {
            self.responses.push(response);
            Ok(())
        }

        fn disable(&mut self) {
            self.disabled = true;
        }
    }

    #[derive(Default)]
    struct Led {
        on: bool,
        toggles: usize,
    }

    impl OutputPin for Led {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            self.on = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.on = true;
            Ok(())
        }
    }

    impl ToggleableOutputPin for Led {
        type Error = Infallible;

        fn toggle(&mut self) -> Result<(), Infallible> {
            self.on = !self.on;
            self.toggles += 1;
            Ok(())
        }
    }

    struct PanicHandoff;

    impl Handoff for PanicHandoff {
        fn start_application(self) -> ! {
            panic!("application started");
        }
    }

    fn bootloader(statuses: &[(u8, u8)]) -> Bootloader<FakeTwi, RamTarget, Led, Led> {
        let config = DeviceConfig::ATMEGA8;
        let memory = RamTarget::new(&config.chip);
        Bootloader::new(
            config,
            FakeTwi::with(statuses),
            memory,
            Led::default(),
            Led::default(),
        )
    }

    #[test]
    fn poll_serves_version_read() {
        let mut b = bootloader(&[(0x60, 0), (0x80, 0x01), (0xA0, 0), (0xA8, 0), (0xB8, 0)]);
        for _ in 0..5 {
            b.poll().unwrap();
        }
        assert!(matches!(b.poll(), Err(nb::Error::WouldBlock)));

        assert_eq!(
            b.twi.responses,
            vec![
                Response::Ack,
                Response::Ack,
                Response::Ack,
                Response::Transmit(b'T'),
                Response::Transmit(b'W'),
            ]
        );
        assert!(b.activity_led.on);
    }

    #[test]
    fn illegal_state_resets_bus() {
        let mut b = bootloader(&[(0x60, 0), (0x00, 0)]);
        b.poll().unwrap();
        b.poll().unwrap();
        assert_eq!(b.twi.responses[1], Response::ResetBus);
        assert_eq!(b.state(), BootState::BootloaderActive);
    }

    #[test]
    fn tick_toggles_run_led() {
        let mut b = bootloader(&[]);
        b.tick();
        b.tick();
        assert_eq!(b.run_led.toggles, 2);
    }

    #[test]
    #[should_panic(expected = "application started")]
    fn unknown_command_hands_over() {
        let b = bootloader(&[(0x60, 0), (0x80, 0xA5)]);
        b.run(|| false, PanicHandoff);
    }

    #[test]
    #[should_panic(expected = "application started")]
    fn timeout_hands_over() {
        let b = bootloader(&[]);
        b.run(|| true, PanicHandoff);
    }
}
