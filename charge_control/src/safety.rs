//! Fail-stop protection.
//!
//! Overcurrent, overvoltage and any reading that cannot be trusted end charging
//! for good: the output is zeroed, the phase becomes terminal and the
//! controller is reset. There is no retry. After the reset the charger starts
//! from defaults and the persisted calibration.

use core::fmt;

use log::error;

use crate::bsp::adc::{RawReading, SensorError};
use crate::bsp::feedback::Event;
use crate::bsp::Board;
use crate::control::{ChargerState, Phase, Thresholds};
use crate::measurement::CalibratedReading;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    OverCurrent { amps: f32 },
    OverVoltage { volts: f32 },
    SensorUnavailable(SensorError),
    /// Counts at or beyond full scale
    AdcOutOfRange(RawReading),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::OverCurrent { amps } => write!(f, "overcurrent {:.2} A", amps),
            Fault::OverVoltage { volts } => write!(f, "overvoltage {:.2} V", volts),
            Fault::SensorUnavailable(e) => write!(f, "{}", e),
            Fault::AdcOutOfRange(raw) => write!(
                f,
                "adc out of range ({} / {} counts)",
                raw.voltage_counts, raw.current_counts
            ),
        }
    }
}

pub struct SafetyMonitor {
    max_safe_current: f32,
    max_battery_voltage: f32,
}

impl SafetyMonitor {
    pub const fn new(thresholds: &Thresholds) -> Self {
        SafetyMonitor {
            max_safe_current: thresholds.max_safe_current,
            max_battery_voltage: thresholds.max_battery_voltage,
        }
    }

    /// Pure check, no side effects. A NaN reading faults.
    pub fn check_safety(&self, reading: &CalibratedReading) -> Result<(), Fault> {
        if reading.current.is_nan() || reading.current > self.max_safe_current {
            Err(Fault::OverCurrent {
                amps: reading.current,
            })
        } else if reading.bus_voltage.is_nan() || reading.bus_voltage > self.max_battery_voltage {
            Err(Fault::OverVoltage {
                volts: reading.bus_voltage,
            })
        } else {
            Ok(())
        }
    }

    /// Zeroes the output before anything else, then marks the state terminal,
    /// raises the alert and resets the controller.
    pub fn shut_down(&self, fault: Fault, state: &mut ChargerState, board: &Board) {
        board.power_stage.set_duty_cycle(0);
        board.power_stage.set_load_enabled(false);

        state.duty_cycle = 0;
        state.phase = Phase::Shutdown(fault);

        error!("overload fault: {}, shutting down", fault);
        board.feedback.signal(Event::OverloadFault { fault });
        board.watchdog.restart();
    }
}

#[cfg(test)]
mod test {
    use crate::control::THRESHOLDS;
    use crate::measurement::CalibratedReading;
    use crate::safety::{Fault, SafetyMonitor};

    fn reading(bus_voltage: f32, current: f32) -> CalibratedReading {
        CalibratedReading {
            bus_voltage,
            current,
        }
    }

    #[test]
    fn readings_within_limits_pass() {
        let monitor = SafetyMonitor::new(&THRESHOLDS);
        assert_eq!(monitor.check_safety(&reading(3.7, 0.5)), Ok(()));
        assert_eq!(monitor.check_safety(&reading(4.2, 2.0)), Ok(()));
    }

    #[test]
    fn overcurrent_faults_with_any_voltage() {
        let monitor = SafetyMonitor::new(&THRESHOLDS);
        for v in [0.0, 3.0, 4.2] {
            assert_eq!(
                monitor.check_safety(&reading(v, 2.1)),
                Err(Fault::OverCurrent { amps: 2.1 })
            );
        }
    }

    #[test]
    fn overvoltage_faults() {
        let monitor = SafetyMonitor::new(&THRESHOLDS);
        assert_eq!(
            monitor.check_safety(&reading(4.25, 0.1)),
            Err(Fault::OverVoltage { volts: 4.25 })
        );
    }

    #[test]
    fn nan_reading_faults() {
        let monitor = SafetyMonitor::new(&THRESHOLDS);
        assert!(monitor.check_safety(&reading(f32::NAN, 0.1)).is_err());
        assert!(monitor.check_safety(&reading(3.7, f32::NAN)).is_err());
    }
}
