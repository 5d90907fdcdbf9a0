use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use charge_control::bsp::adc::{MeasurementSource, RawReading, SensorError};
use charge_control::bsp::delay::Delay;
use charge_control::bsp::feedback::{Event, Feedback};
use charge_control::bsp::power_stage::PowerStage;
use charge_control::bsp::watchdog::Watchdog;
use charge_control::measurement::AdcScale;

use crate::battery_model::{BatteryModel, PLANT_SPEEDUP};

const MAX_ALERTS: usize = 6;

/// ADC wired to the simulated cell
pub struct SimSensors<'a> {
    pub plant: &'a RefCell<BatteryModel>,
    pub scale: AdcScale,
}

impl<'a> MeasurementSource for SimSensors<'a> {
    fn read_raw(&self) -> Result<RawReading, SensorError> {
        Ok(self.plant.borrow().sample(&self.scale))
    }

    fn read_reference(&self) -> Result<u16, SensorError> {
        Ok(self.plant.borrow().reference_counts(&self.scale))
    }
}

pub struct SimPowerStage<'a> {
    pub plant: &'a RefCell<BatteryModel>,
}

impl<'a> PowerStage for SimPowerStage<'a> {
    fn set_duty_cycle(&self, duty: u8) {
        self.plant.borrow_mut().set_duty_cycle(duty);
    }

    fn set_load_enabled(&self, enabled: bool) {
        self.plant.borrow_mut().set_load_enabled(enabled);
    }
}

/// Blocking delays advance the plant instead of the wall clock
pub struct SimDelay<'a> {
    pub plant: &'a RefCell<BatteryModel>,
}

impl<'a> Delay for SimDelay<'a> {
    fn delay_ms(&self, ms: u32) {
        self.plant.borrow_mut().advance(ms * PLANT_SPEEDUP);
    }
}

/// Stands in for the independent watchdog. Once restarted it expires after
/// `timeout` and the simulator reboots the core.
pub struct SimWatchdog {
    timeout: Duration,
    armed_at: Cell<Option<Instant>>,
}

impl SimWatchdog {
    pub fn new(timeout: Duration) -> Self {
        SimWatchdog {
            timeout,
            armed_at: Cell::new(None),
        }
    }

    pub fn expired(&self) -> bool {
        self.armed_at
            .get()
            .map_or(false, |armed_at| armed_at.elapsed() >= self.timeout)
    }

    pub fn disarm(&self) {
        self.armed_at.set(None);
    }
}

impl Watchdog for SimWatchdog {
    fn restart(&self) {
        self.armed_at.set(Some(Instant::now()));
    }
}

/// Display and buzzer. Renders events as text for the TUI.
pub struct SimDisplay {
    readout: Cell<Option<(f32, f32, u8)>>,
    status: Cell<&'static str>,
    alerts: RefCell<VecDeque<String>>,
}

impl SimDisplay {
    pub fn new() -> Self {
        SimDisplay {
            readout: Cell::new(None),
            status: Cell::new("idle"),
            alerts: RefCell::new(VecDeque::new()),
        }
    }

    /// Called on boot, the display controller is reset as well
    pub fn reset(&self) {
        self.readout.set(None);
        self.status.set("idle");
    }

    pub fn readout(&self) -> String {
        match self.readout.get() {
            Some((voltage, current, duty)) => format!(
                "Chg: {:.2} A / Bat: {:.2} V / Duty: {}",
                current, voltage, duty
            ),
            None => "Chg: -.-- A / Bat: -.-- V".to_string(),
        }
    }

    pub fn status(&self) -> &'static str {
        self.status.get()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.borrow().iter().cloned().collect()
    }

    fn alert(&self, text: String) {
        let mut alerts = self.alerts.borrow_mut();
        if alerts.len() == MAX_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(text);
    }
}

impl Default for SimDisplay {
    fn default() -> Self {
        SimDisplay::new()
    }
}

impl Feedback for SimDisplay {
    fn signal(&self, event: Event) {
        match event {
            Event::ChargingStarted => self.status.set("charging"),
            Event::ChargingStopped => self.status.set("idle"),
            Event::ChargeTick {
                voltage,
                current,
                duty_cycle,
            } => self.readout.set(Some((voltage, current, duty_cycle))),
            Event::CalibrationDone { factors } => self.alert(format!(
                "Calibrated: V x{:.4} I x{:.4}",
                factors.voltage, factors.current
            )),
            Event::CalibrationFailed { step, error } => {
                self.alert(format!("Cal {:?} failed: {}", step, error))
            }
            Event::OverloadFault { fault } => {
                self.status.set("FAULT");
                self.alert(format!("OVERLOAD! {}", fault));
            }
            Event::StorageWarning { source } => {
                self.alert(format!("Calibration lost ({:?}), using defaults", source))
            }
        }
    }
}
