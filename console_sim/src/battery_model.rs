use charge_control::bsp::adc::RawReading;
use charge_control::bsp::power_stage::DUTY_MAX;
use charge_control::calibration::KNOWN_REFERENCE_VOLTS;
use charge_control::measurement::AdcScale;

/// Input of the buck converter, V
const SUPPLY_VOLTS: f32 = 5.0;
/// Simulated time runs this much faster than wall time
pub const PLANT_SPEEDUP: u32 = 120;

const CAPACITY_AH: f32 = 2.0;
const INTERNAL_RESISTANCE: f32 = 0.15;
/// Inductor, wiring and shunt
const PATH_RESISTANCE: f32 = 0.15;
const EMPTY_VOLTS: f32 = 3.0;
const FULL_VOLTS: f32 = 4.2;
/// What the on-board test load really draws
const TEST_LOAD_AMPS: f32 = 1.0;
/// Extra current through the shunt while a short is injected
const SHORT_CIRCUIT_AMPS: f32 = 2.5;

/// ## A single Li-ion cell behind a buck converter
///
/// The open circuit voltage rises linearly with the state of charge, the
/// converter output is `SUPPLY_VOLTS * duty / 255` and the difference drives a
/// current through the internal and path resistance. The converter cannot
/// sink current.
///
/// ### Front end errors
/// `adc_gain` is an error of the ADC reference and affects every channel,
/// including the internal 1.1 V reference. `shunt_gain` is an error of the
/// shunt amplifier only. Calibration is expected to remove both.
pub struct BatteryModel {
    pub state_of_charge: f32,
    pub adc_gain: f32,
    pub shunt_gain: f32,
    duty_cycle: u8,
    load_enabled: bool,
    short_circuit: bool,
}

impl BatteryModel {
    pub fn new(state_of_charge: f32) -> Self {
        BatteryModel {
            state_of_charge,
            adc_gain: 0.97,
            shunt_gain: 1.06,
            duty_cycle: 0,
            load_enabled: false,
            short_circuit: false,
        }
    }

    pub fn set_duty_cycle(&mut self, duty: u8) {
        self.duty_cycle = duty;
    }

    pub fn duty_cycle(&self) -> u8 {
        self.duty_cycle
    }

    pub fn set_load_enabled(&mut self, enabled: bool) {
        self.load_enabled = enabled;
    }

    pub fn load_enabled(&self) -> bool {
        self.load_enabled
    }

    /// Shorts the output downstream of the shunt until [Self::clear_faults]
    pub fn inject_short_circuit(&mut self) {
        self.short_circuit = true;
    }

    pub fn short_circuit(&self) -> bool {
        self.short_circuit
    }

    pub fn clear_faults(&mut self) {
        self.short_circuit = false;
    }

    pub fn open_circuit_volts(&self) -> f32 {
        EMPTY_VOLTS + (FULL_VOLTS - EMPTY_VOLTS) * self.state_of_charge
    }

    fn converter_volts(&self) -> f32 {
        SUPPLY_VOLTS * self.duty_cycle as f32 / DUTY_MAX as f32
    }

    /// Current into the cell
    pub fn charge_current(&self) -> f32 {
        let drive = self.converter_volts() - self.open_circuit_volts();
        (drive / (INTERNAL_RESISTANCE + PATH_RESISTANCE)).max(0.0)
    }

    pub fn terminal_volts(&self) -> f32 {
        self.open_circuit_volts() + self.charge_current() * INTERNAL_RESISTANCE
    }

    /// Everything that flows through the shunt
    pub fn shunt_current(&self) -> f32 {
        let mut current = self.charge_current();
        if self.load_enabled {
            current += TEST_LOAD_AMPS;
        }
        if self.short_circuit && self.duty_cycle > 0 {
            current += SHORT_CIRCUIT_AMPS;
        }
        current
    }

    /// Moves the plant forward by `ms` of simulated time
    pub fn advance(&mut self, ms: u32) {
        let hours = ms as f32 / 3_600_000.0;
        let charged = self.charge_current() * hours / CAPACITY_AH;
        self.state_of_charge = (self.state_of_charge + charged).clamp(0.0, 1.0);
    }

    /// What the ADC sees, front end errors included
    pub fn sample(&self, scale: &AdcScale) -> RawReading {
        let pin_volts = self.terminal_volts() / scale.voltage_divider;
        let shunt_volts = self.shunt_current() * scale.shunt_ohms * self.shunt_gain;
        RawReading {
            voltage_counts: scale.volts_to_counts(pin_volts * self.adc_gain),
            current_counts: scale.volts_to_counts(shunt_volts * self.adc_gain),
        }
    }

    pub fn reference_counts(&self, scale: &AdcScale) -> u16 {
        scale.volts_to_counts(KNOWN_REFERENCE_VOLTS * self.adc_gain)
    }
}
