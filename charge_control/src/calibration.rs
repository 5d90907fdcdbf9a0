use core::fmt;

use log::{info, warn};

use crate::bsp::adc::SensorError;
use crate::bsp::eeprom::Eeprom;
use crate::bsp::feedback::Event;
use crate::bsp::Board;
use crate::measurement::AdcScale;
use crate::storage::{CalibrationStore, LoadSource, StorageError};

/// Internal reference read back by the voltage calibration
pub const KNOWN_REFERENCE_VOLTS: f32 = 1.1;
/// Current drawn by the on-board test load
pub const TEST_LOAD_AMPS: f32 = 1.0;
/// Output capacitor discharge after the duty cycle is zeroed
pub const OUTPUT_DISCHARGE_DELAY_MS: u32 = 100;
/// Shunt settling after the test load is switched in
pub const LOAD_SETTLE_DELAY_MS: u32 = 100;

/// Linear correction applied to converted readings
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationFactors {
    pub voltage: f32,
    pub current: f32,
}

impl CalibrationFactors {
    pub const IDENTITY: CalibrationFactors = CalibrationFactors {
        voltage: 1.0,
        current: 1.0,
    };

    pub fn is_valid(&self) -> bool {
        is_valid_factor(self.voltage) && is_valid_factor(self.current)
    }
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        CalibrationFactors::IDENTITY
    }
}

/// Smallest correction a healthy front end needs
pub const MIN_FACTOR: f32 = 0.5;
/// Largest correction a healthy front end needs
pub const MAX_FACTOR: f32 = 2.0;

/// Inside [MIN_FACTOR]..=[MAX_FACTOR], NaN excluded
fn is_valid_factor(factor: f32) -> bool {
    (MIN_FACTOR..=MAX_FACTOR).contains(&factor)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationStep {
    Voltage,
    Current,
    Persist,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Reference reading was zero
    ZeroReading,
    /// Reference reading clipped at full scale
    Saturated,
    /// Factor outside [MIN_FACTOR]..=[MAX_FACTOR]
    InvalidFactor,
    Sensor(SensorError),
    Storage(StorageError),
    /// The charger is shut down and waits for reset
    Halted,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::ZeroReading => f.write_str("reference reads zero"),
            CalibrationError::Saturated => f.write_str("reference reading saturated"),
            CalibrationError::InvalidFactor => f.write_str("factor out of range"),
            CalibrationError::Sensor(e) => write!(f, "{}", e),
            CalibrationError::Storage(e) => write!(f, "{}", e),
            CalibrationError::Halted => f.write_str("charger halted"),
        }
    }
}

/// `expected / measured`, refusing degenerate readings
fn derive_factor(
    scale: &AdcScale,
    counts: u16,
    measured: f32,
    expected: f32,
) -> Result<f32, CalibrationError> {
    if counts == 0 {
        return Err(CalibrationError::ZeroReading);
    }
    if scale.is_saturated(counts) {
        return Err(CalibrationError::Saturated);
    }
    let factor = expected / measured;
    if is_valid_factor(factor) {
        Ok(factor)
    } else {
        Err(CalibrationError::InvalidFactor)
    }
}

/// Owns the active calibration factors and the only write path to the store.
pub struct Calibrator<E: Eeprom> {
    store: CalibrationStore<E>,
    factors: CalibrationFactors,
    scale: AdcScale,
}

impl<E: Eeprom> Calibrator<E> {
    /// Reads persisted factors. Corrupt or missing storage yields identity.
    pub fn load(mut store: CalibrationStore<E>, scale: AdcScale) -> (Self, LoadSource) {
        let (factors, source) = store.load();
        (
            Calibrator {
                store,
                factors,
                scale,
            },
            source,
        )
    }

    /// Copy of the active factors
    pub fn factors(&self) -> CalibrationFactors {
        self.factors
    }

    pub fn store(&self) -> &CalibrationStore<E> {
        &self.store
    }

    /// Reads the internal reference and returns the factor that maps it back
    /// to [KNOWN_REFERENCE_VOLTS]. Nothing is changed.
    pub fn measure_voltage_factor(&self, board: &Board) -> Result<f32, CalibrationError> {
        let counts = board
            .sensors
            .read_reference()
            .map_err(CalibrationError::Sensor)?;
        let measured = self.scale.counts_to_volts(counts);
        derive_factor(&self.scale, counts, measured, KNOWN_REFERENCE_VOLTS)
    }

    /// Switches the output off, draws [TEST_LOAD_AMPS] through the shunt and
    /// returns the factor that maps the shunt reading to it.
    ///
    /// Blocks for [OUTPUT_DISCHARGE_DELAY_MS] + [LOAD_SETTLE_DELAY_MS]. The load
    /// is always switched off again. `prior_duty` is restored unless the
    /// sensor failed, in which case the output stays off.
    pub fn measure_current_factor(
        &self,
        board: &Board,
        prior_duty: u8,
    ) -> Result<f32, CalibrationError> {
        board.power_stage.set_duty_cycle(0);
        board.delay.delay_ms(OUTPUT_DISCHARGE_DELAY_MS);
        board.power_stage.set_load_enabled(true);
        board.delay.delay_ms(LOAD_SETTLE_DELAY_MS);

        let sample = board.sensors.read_raw();
        board.power_stage.set_load_enabled(false);
        let raw = sample.map_err(CalibrationError::Sensor)?;
        board.power_stage.set_duty_cycle(prior_duty);

        let measured = self.scale.shunt_current(raw.current_counts);
        derive_factor(&self.scale, raw.current_counts, measured, TEST_LOAD_AMPS)
    }

    pub fn calibrate_voltage(
        &mut self,
        board: &Board,
    ) -> Result<CalibrationFactors, CalibrationError> {
        let result = self
            .measure_voltage_factor(board)
            .map_err(|e| (CalibrationStep::Voltage, e))
            .and_then(|voltage| {
                self.commit(CalibrationFactors {
                    voltage,
                    ..self.factors
                })
            });
        self.report(board, result)
    }

    pub fn calibrate_current(
        &mut self,
        board: &Board,
        prior_duty: u8,
    ) -> Result<CalibrationFactors, CalibrationError> {
        let result = self
            .measure_current_factor(board, prior_duty)
            .map_err(|e| (CalibrationStep::Current, e))
            .and_then(|current| {
                self.commit(CalibrationFactors {
                    current,
                    ..self.factors
                })
            });
        self.report(board, result)
    }

    /// Voltage then current, persisted as one record. A failing step aborts
    /// the run and leaves both factors as they were.
    pub fn calibrate_system(
        &mut self,
        board: &Board,
        prior_duty: u8,
    ) -> Result<CalibrationFactors, CalibrationError> {
        let result = self
            .measure_voltage_factor(board)
            .map_err(|e| (CalibrationStep::Voltage, e))
            .and_then(|voltage| {
                self.measure_current_factor(board, prior_duty)
                    .map(|current| CalibrationFactors { voltage, current })
                    .map_err(|e| (CalibrationStep::Current, e))
            })
            .and_then(|candidate| self.commit(candidate));
        self.report(board, result)
    }

    /// Persists first, the active factors change only if the record is stored
    fn commit(
        &mut self,
        candidate: CalibrationFactors,
    ) -> Result<CalibrationFactors, (CalibrationStep, CalibrationError)> {
        self.store
            .save(&candidate)
            .map_err(|e| (CalibrationStep::Persist, CalibrationError::Storage(e)))?;
        self.factors = candidate;
        Ok(candidate)
    }

    fn report(
        &self,
        board: &Board,
        result: Result<CalibrationFactors, (CalibrationStep, CalibrationError)>,
    ) -> Result<CalibrationFactors, CalibrationError> {
        match result {
            Ok(factors) => {
                info!(
                    "calibrated: voltage {} current {}",
                    factors.voltage, factors.current
                );
                board.feedback.signal(Event::CalibrationDone { factors });
                Ok(factors)
            }
            Err((step, error)) => {
                warn!("calibration {:?} failed: {}", step, error);
                board
                    .feedback
                    .signal(Event::CalibrationFailed { step, error });
                Err(error)
            }
        }
    }
}
