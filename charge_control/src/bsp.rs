//! Board support: everything the charger core touches on the outside.
//!
//! Firmware implements these against the real ADC, PWM timer, EEPROM, watchdog
//! and display/buzzer. The simulator and the test bench implement them in memory.

pub mod adc {
    use core::fmt;

    /// Raw ADC counts of the bus voltage divider and the shunt amplifier,
    /// taken once per tick and never stored.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct RawReading {
        pub voltage_counts: u16,
        pub current_counts: u16,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum SensorError {
        /// The converter did not answer
        Unavailable,
        /// Conversion did not finish in time
        Timeout,
    }

    impl fmt::Display for SensorError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                SensorError::Unavailable => f.write_str("sensor unavailable"),
                SensorError::Timeout => f.write_str("sensor timeout"),
            }
        }
    }

    /// Source of raw bus voltage and shunt current samples.
    ///
    /// Reading has no side effects. A failed read is a safety fault for the
    /// core, never a crash.
    pub trait MeasurementSource {
        fn read_raw(&self) -> Result<RawReading, SensorError>;

        /// Counts of the internal 1.1 V reference channel
        fn read_reference(&self) -> Result<u16, SensorError>;
    }
}

pub mod power_stage {
    pub const DUTY_MAX: u8 = 255;

    /// PWM input of the buck converter plus the calibration test load switch.
    ///
    /// Both outputs are level driven: calling them repeatedly with the same
    /// value is harmless and there is no minimum call interval.
    pub trait PowerStage {
        fn set_duty_cycle(&self, duty: u8);
        fn set_load_enabled(&self, enabled: bool);
    }
}

pub mod eeprom {
    use core::fmt;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum EepromError {
        OutOfBounds,
        ReadFailed,
        WriteFailed,
    }

    impl fmt::Display for EepromError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                EepromError::OutOfBounds => f.write_str("eeprom access out of bounds"),
                EepromError::ReadFailed => f.write_str("eeprom read failed"),
                EepromError::WriteFailed => f.write_str("eeprom write failed"),
            }
        }
    }

    /// Byte addressable non-volatile memory. Erased cells read as 0xFF.
    pub trait Eeprom {
        fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), EepromError>;
        fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), EepromError>;
    }
}

pub mod delay {
    /// Blocking wait. The whole core stops for the duration, which is what the
    /// calibration settling and soft-start steps rely on.
    pub trait Delay {
        fn delay_ms(&self, ms: u32);
    }
}

pub mod watchdog {
    /// Hard reset of the controller. On target this arms the watchdog with the
    /// shortest timeout and never returns.
    pub trait Watchdog {
        fn restart(&self);
    }
}

pub mod feedback {
    use crate::calibration::{CalibrationError, CalibrationFactors, CalibrationStep};
    use crate::safety::Fault;
    use crate::storage::LoadSource;

    /// Discrete events for the display and buzzer. The core never formats text.
    #[derive(Clone, Copy, Debug, PartialEq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum Event {
        ChargingStarted,
        ChargingStopped,
        ChargeTick {
            voltage: f32,
            current: f32,
            duty_cycle: u8,
        },
        CalibrationDone {
            factors: CalibrationFactors,
        },
        CalibrationFailed {
            step: CalibrationStep,
            error: CalibrationError,
        },
        OverloadFault {
            fault: Fault,
        },
        /// Stored calibration was unusable, running on identity factors
        StorageWarning {
            source: LoadSource,
        },
    }

    pub trait Feedback {
        fn signal(&self, event: Event);
    }
}

/// The collaborators the core drives, borrowed for the lifetime of the charger
#[derive(Clone, Copy)]
pub struct Board<'a> {
    pub sensors: &'a dyn adc::MeasurementSource,
    pub power_stage: &'a dyn power_stage::PowerStage,
    pub delay: &'a dyn delay::Delay,
    pub feedback: &'a dyn feedback::Feedback,
    pub watchdog: &'a dyn watchdog::Watchdog,
}
