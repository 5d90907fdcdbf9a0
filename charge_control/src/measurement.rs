use crate::bsp::adc::RawReading;
use crate::calibration::CalibrationFactors;

/// Analog front end: ADC resolution and reference, bus divider, shunt.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcScale {
    /// Counts at the reference voltage
    pub full_scale_counts: u16,
    pub reference_volts: f32,
    /// Bus voltage = pin voltage * divider
    pub voltage_divider: f32,
    pub shunt_ohms: f32,
}

pub const ADC_SCALE: AdcScale = AdcScale {
    full_scale_counts: 4095,
    reference_volts: 3.3,
    voltage_divider: 2.0,
    shunt_ohms: 0.1,
};

/// Bus voltage (V) and charge current (A) after calibration
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibratedReading {
    pub bus_voltage: f32,
    pub current: f32,
}

impl AdcScale {
    /// Voltage at the ADC pin
    pub fn counts_to_volts(&self, counts: u16) -> f32 {
        counts as f32 * self.reference_volts / self.full_scale_counts as f32
    }

    /// A count at or above full scale means the input is clipped and the real
    /// value is unknown.
    pub fn is_saturated(&self, counts: u16) -> bool {
        counts >= self.full_scale_counts
    }

    pub fn in_range(&self, raw: &RawReading) -> bool {
        !self.is_saturated(raw.voltage_counts) && !self.is_saturated(raw.current_counts)
    }

    pub fn bus_voltage(&self, counts: u16) -> f32 {
        self.counts_to_volts(counts) * self.voltage_divider
    }

    /// Ohm's law over the shunt
    pub fn shunt_current(&self, counts: u16) -> f32 {
        self.counts_to_volts(counts) / self.shunt_ohms
    }

    pub fn calibrate(&self, raw: &RawReading, factors: CalibrationFactors) -> CalibratedReading {
        CalibratedReading {
            bus_voltage: self.bus_voltage(raw.voltage_counts) * factors.voltage,
            current: self.shunt_current(raw.current_counts) * factors.current,
        }
    }

    /// Inverse of [Self::counts_to_volts], clamped to the converter range.
    /// Used by simulators to produce counts for a given pin voltage.
    pub fn volts_to_counts(&self, volts: f32) -> u16 {
        let counts = volts * self.full_scale_counts as f32 / self.reference_volts;
        if counts.is_nan() || counts <= 0.0 {
            0
        } else if counts >= self.full_scale_counts as f32 {
            self.full_scale_counts
        } else {
            (counts + 0.5) as u16
        }
    }
}
