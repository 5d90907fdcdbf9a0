use crate::bsp::power_stage::DUTY_MAX;
use crate::measurement::CalibratedReading;
use crate::safety::Fault;

/// Limits of the charger, fixed for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Thresholds {
    /// Above this the charger trips, A
    pub max_safe_current: f32,
    /// Above this the charger trips, V
    pub max_battery_voltage: f32,
    /// Constant current set point, A
    pub target_charge_current: f32,
    /// Constant voltage set point, V
    pub max_charging_voltage: f32,
}

/// Single Li-ion cell. The CV set point sits below the trip voltage so that
/// the constant voltage region can be regulated without tripping.
pub const THRESHOLDS: Thresholds = Thresholds {
    max_safe_current: 2.0,
    max_battery_voltage: 4.2,
    target_charge_current: 0.5,
    max_charging_voltage: 4.15,
};

pub const SOFT_START_STEP: u8 = 5;
pub const SOFT_START_STEP_MS: u32 = 50;
pub const SOFT_START_CEILING: u8 = DUTY_MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Output off, measurements are still checked every tick
    Idle,
    /// Soft start in progress
    RampingUp,
    /// Closed loop CC/CV
    Regulating,
    /// Terminal, only a reset leaves it
    Shutdown(Fault),
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargerState {
    pub duty_cycle: u8,
    pub phase: Phase,
}

impl ChargerState {
    pub const INITIAL: ChargerState = ChargerState {
        duty_cycle: 0,
        phase: Phase::Idle,
    };

    pub fn is_shut_down(&self) -> bool {
        matches!(self.phase, Phase::Shutdown(_))
    }

    pub fn fault(&self) -> Option<Fault> {
        match self.phase {
            Phase::Shutdown(fault) => Some(fault),
            _ => None,
        }
    }
}

impl Default for ChargerState {
    fn default() -> Self {
        ChargerState::INITIAL
    }
}

/// CC/CV regulation, one duty cycle unit per tick
pub struct ChargeController {
    target_charge_current: f32,
    max_charging_voltage: f32,
}

impl ChargeController {
    pub const fn new(thresholds: &Thresholds) -> Self {
        ChargeController {
            target_charge_current: thresholds.target_charge_current,
            max_charging_voltage: thresholds.max_charging_voltage,
        }
    }

    /// Next duty cycle for the given reading.
    ///
    /// Below the CV set point the current is regulated to the target, at or
    /// above it the voltage is held. Saturates at 0 and [DUTY_MAX].
    pub fn regulate(&self, duty: u8, reading: &CalibratedReading) -> u8 {
        if reading.bus_voltage < self.max_charging_voltage {
            if reading.current < self.target_charge_current {
                duty.saturating_add(1)
            } else if reading.current > self.target_charge_current {
                duty.saturating_sub(1)
            } else {
                duty
            }
        } else if reading.bus_voltage > self.max_charging_voltage {
            duty.saturating_sub(1)
        } else {
            duty
        }
    }

    /// Constant current region with the current still below target.
    /// Soft start keeps ramping only while this holds.
    pub fn wants_more_output(&self, reading: &CalibratedReading) -> bool {
        reading.bus_voltage < self.max_charging_voltage
            && reading.current < self.target_charge_current
    }
}

#[cfg(test)]
mod test {
    use crate::control::{ChargeController, Thresholds, THRESHOLDS};
    use crate::measurement::CalibratedReading;

    const CV_AT_4V2: Thresholds = Thresholds {
        max_charging_voltage: 4.2,
        ..THRESHOLDS
    };

    fn reading(bus_voltage: f32, current: f32) -> CalibratedReading {
        CalibratedReading {
            bus_voltage,
            current,
        }
    }

    #[test]
    fn constant_current_below_target_steps_up() {
        let controller = ChargeController::new(&CV_AT_4V2);
        assert_eq!(controller.regulate(100, &reading(3.8, 0.4)), 101);
    }

    #[test]
    fn constant_current_above_target_steps_down() {
        let controller = ChargeController::new(&CV_AT_4V2);
        assert_eq!(controller.regulate(100, &reading(3.8, 0.6)), 99);
    }

    #[test]
    fn constant_current_on_target_holds() {
        let controller = ChargeController::new(&CV_AT_4V2);
        assert_eq!(controller.regulate(100, &reading(3.8, 0.5)), 100);
    }

    #[test]
    fn constant_voltage_above_set_point_steps_down_regardless_of_current() {
        let controller = ChargeController::new(&CV_AT_4V2);
        for current in [0.0, 0.4, 0.5, 1.9] {
            assert_eq!(controller.regulate(150, &reading(4.25, current)), 149);
        }
    }

    #[test]
    fn constant_voltage_on_set_point_holds() {
        let controller = ChargeController::new(&CV_AT_4V2);
        assert_eq!(controller.regulate(150, &reading(4.2, 0.1)), 150);
    }

    #[test]
    fn duty_cycle_saturates_at_both_ends() {
        let controller = ChargeController::new(&THRESHOLDS);
        assert_eq!(controller.regulate(255, &reading(3.0, 0.0)), 255);
        assert_eq!(controller.regulate(0, &reading(3.0, 1.5)), 0);
        assert_eq!(controller.regulate(0, &reading(4.19, 0.0)), 0);
    }

    #[test]
    fn duty_cycle_moves_at_most_one_step() {
        let controller = ChargeController::new(&THRESHOLDS);
        let voltages = [0.0, 3.0, 4.0, 4.149, 4.15, 4.151, 4.2, 5.0];
        let currents = [0.0, 0.25, 0.499, 0.5, 0.501, 1.0, 2.5];
        for duty in [0u8, 1, 127, 254, 255] {
            for v in voltages {
                for i in currents {
                    let next = controller.regulate(duty, &reading(v, i));
                    let step = (next as i16 - duty as i16).abs();
                    assert!(step <= 1, "duty {} v {} i {} -> {}", duty, v, i, next);
                }
            }
        }
    }

    #[test]
    fn more_output_only_in_constant_current_below_target() {
        let controller = ChargeController::new(&THRESHOLDS);
        assert!(controller.wants_more_output(&reading(3.7, 0.1)));
        assert!(!controller.wants_more_output(&reading(3.7, 0.5)));
        assert!(!controller.wants_more_output(&reading(4.15, 0.1)));
    }
}
