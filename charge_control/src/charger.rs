//! The charger as a whole: one instance per boot.
//!
//! Every public operation takes `&mut self`, so ticks, soft start and
//! calibration can never interleave. A threaded host has to keep the charger
//! behind a single owner or a mutex around each call.

use log::{debug, info, warn};

use crate::bsp::eeprom::Eeprom;
use crate::bsp::feedback::Event;
use crate::bsp::Board;
use crate::calibration::{CalibrationError, CalibrationFactors, Calibrator};
use crate::control::{
    ChargeController, ChargerState, Phase, Thresholds, SOFT_START_CEILING, SOFT_START_STEP,
    SOFT_START_STEP_MS,
};
use crate::measurement::{AdcScale, CalibratedReading};
use crate::safety::{Fault, SafetyMonitor};
use crate::storage::{CalibrationStore, LoadSource};

pub struct Charger<'a, E: Eeprom> {
    board: Board<'a>,
    thresholds: Thresholds,
    scale: AdcScale,
    calibrator: Calibrator<E>,
    safety: SafetyMonitor,
    controller: ChargeController,
    state: ChargerState,
    load_source: LoadSource,
}

impl<'a, E: Eeprom> Charger<'a, E> {
    /// Boots the charger: output off, calibration read from the store.
    pub fn new(
        board: Board<'a>,
        store: CalibrationStore<E>,
        thresholds: Thresholds,
        scale: AdcScale,
    ) -> Self {
        board.power_stage.set_duty_cycle(0);
        board.power_stage.set_load_enabled(false);

        let (calibrator, load_source) = Calibrator::load(store, scale);
        if load_source.is_degraded() {
            warn!("running uncalibrated ({:?})", load_source);
            board.feedback.signal(Event::StorageWarning {
                source: load_source,
            });
        }

        Charger {
            board,
            thresholds,
            scale,
            calibrator,
            safety: SafetyMonitor::new(&thresholds),
            controller: ChargeController::new(&thresholds),
            state: ChargerState::INITIAL,
            load_source,
        }
    }

    pub fn state(&self) -> ChargerState {
        self.state
    }

    pub fn factors(&self) -> CalibrationFactors {
        self.calibrator.factors()
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn load_source(&self) -> LoadSource {
        self.load_source
    }

    pub fn calibration_store(&self) -> &CalibrationStore<E> {
        self.calibrator.store()
    }

    /// One control tick: measure, gate on safety, regulate, drive the output.
    ///
    /// After a shutdown every further tick returns the same fault without
    /// touching the hardware.
    pub fn tick(&mut self) -> Result<CalibratedReading, Fault> {
        if let Some(fault) = self.state.fault() {
            return Err(fault);
        }

        let reading = self.checked_reading()?;

        if self.state.phase == Phase::Regulating {
            self.state.duty_cycle = self.controller.regulate(self.state.duty_cycle, &reading);
        }
        self.board.power_stage.set_duty_cycle(self.state.duty_cycle);

        debug!(
            "tick: {} V {} A duty {}",
            reading.bus_voltage, reading.current, self.state.duty_cycle
        );
        self.board.feedback.signal(Event::ChargeTick {
            voltage: reading.bus_voltage,
            current: reading.current,
            duty_cycle: self.state.duty_cycle,
        });
        Ok(reading)
    }

    /// Soft start, then hand over to the regulation loop.
    ///
    /// The duty cycle ramps by [SOFT_START_STEP] every [SOFT_START_STEP_MS]
    /// while the battery is below the current target and the CV set point.
    /// Each step is safety checked. Blocks for the duration of the ramp.
    pub fn start_charging(&mut self) -> Result<(), Fault> {
        if let Some(fault) = self.state.fault() {
            return Err(fault);
        }
        if self.state.phase == Phase::Regulating {
            return Ok(());
        }

        info!("charging started");
        self.board.feedback.signal(Event::ChargingStarted);
        self.state.phase = Phase::RampingUp;

        let mut duty = self.state.duty_cycle;
        loop {
            let reading = self.checked_reading()?;
            if !self.controller.wants_more_output(&reading) || duty >= SOFT_START_CEILING {
                break;
            }
            duty = duty.saturating_add(SOFT_START_STEP).min(SOFT_START_CEILING);
            self.state.duty_cycle = duty;
            self.board.power_stage.set_duty_cycle(duty);
            self.board.delay.delay_ms(SOFT_START_STEP_MS);
        }

        info!("soft start done at duty {}", duty);
        self.state.phase = Phase::Regulating;
        Ok(())
    }

    /// Operator stop. Output off, back to idle.
    pub fn stop_charging(&mut self) -> Result<(), Fault> {
        if let Some(fault) = self.state.fault() {
            return Err(fault);
        }
        self.board.power_stage.set_duty_cycle(0);
        self.board.power_stage.set_load_enabled(false);
        self.state = ChargerState::INITIAL;

        info!("charging stopped");
        self.board.feedback.signal(Event::ChargingStopped);
        Ok(())
    }

    /// A sensor that fails to answer during calibration shuts the charger
    /// down, same as during a tick.
    pub fn calibrate_voltage(&mut self) -> Result<CalibrationFactors, CalibrationError> {
        self.ensure_running()?;
        let result = self.calibrator.calibrate_voltage(&self.board);
        self.trip_on_sensor_failure(result)
    }

    /// Blocks for the load settling time. The duty cycle in effect before the
    /// call is restored afterwards, unless the sensor failed.
    pub fn calibrate_current(&mut self) -> Result<CalibrationFactors, CalibrationError> {
        self.ensure_running()?;
        let result = self
            .calibrator
            .calibrate_current(&self.board, self.state.duty_cycle);
        self.trip_on_sensor_failure(result)
    }

    pub fn calibrate_system(&mut self) -> Result<CalibrationFactors, CalibrationError> {
        self.ensure_running()?;
        let result = self
            .calibrator
            .calibrate_system(&self.board, self.state.duty_cycle);
        self.trip_on_sensor_failure(result)
    }

    fn trip_on_sensor_failure(
        &mut self,
        result: Result<CalibrationFactors, CalibrationError>,
    ) -> Result<CalibrationFactors, CalibrationError> {
        if let Err(CalibrationError::Sensor(e)) = result {
            self.safety
                .shut_down(Fault::SensorUnavailable(e), &mut self.state, &self.board);
        }
        result
    }

    fn ensure_running(&self) -> Result<(), CalibrationError> {
        if self.state.is_shut_down() {
            Err(CalibrationError::Halted)
        } else {
            Ok(())
        }
    }

    /// Reads, validates and calibrates one sample. Any problem shuts the
    /// charger down before returning the fault.
    fn checked_reading(&mut self) -> Result<CalibratedReading, Fault> {
        let factors = self.calibrator.factors();
        let checked = self
            .board
            .sensors
            .read_raw()
            .map_err(Fault::SensorUnavailable)
            .and_then(|raw| {
                if self.scale.in_range(&raw) {
                    Ok(raw)
                } else {
                    Err(Fault::AdcOutOfRange(raw))
                }
            })
            .map(|raw| self.scale.calibrate(&raw, factors))
            .and_then(|reading| self.safety.check_safety(&reading).map(|_| reading));

        if let Err(fault) = checked {
            self.safety.shut_down(fault, &mut self.state, &self.board);
        }
        checked
    }
}
