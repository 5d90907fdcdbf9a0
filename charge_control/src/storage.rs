//! Persisted calibration factors.
//!
//! Two copies of the record live in EEPROM, slot A at offset 0 and slot B at
//! offset 16:
//!
//! ```text
//! +0  voltage factor  f32 LE
//! +4  current factor  f32 LE
//! +8  sequence        u16 LE
//! +10 CRC-16/CCITT-FALSE over +0..+10
//! ```
//!
//! A save always overwrites the older slot and a load picks the newest slot
//! that passes validation, so a reset in the middle of a write leaves the
//! previous pair in place.

use core::fmt;

use log::{debug, info, warn};

use crate::bsp::eeprom::{Eeprom, EepromError};
use crate::calibration::CalibrationFactors;
use crate::crc::crc16_ccitt_false;

pub const SLOT_LEN: usize = 12;
pub const SLOT_OFFSETS: [usize; 2] = [0, 16];
const PAYLOAD_LEN: usize = 10;
const ERASED: u8 = 0xFF;

/// Where the factors returned by [CalibrationStore::load] came from
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadSource {
    Stored,
    /// Never written, identity factors
    Blank,
    /// Written but no slot is valid, identity factors
    Corrupt,
    /// EEPROM did not answer, identity factors
    ReadFailed,
}

impl LoadSource {
    /// Identity fallback that the operator should hear about
    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadSource::Corrupt | LoadSource::ReadFailed)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    Eeprom(EepromError),
    /// Read back differs from what was written
    VerifyFailed,
    /// Refusing to persist factors outside the plausible window
    InvalidFactors,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Eeprom(e) => write!(f, "{}", e),
            StorageError::VerifyFailed => f.write_str("calibration record verify failed"),
            StorageError::InvalidFactors => f.write_str("invalid calibration factors"),
        }
    }
}

impl From<EepromError> for StorageError {
    fn from(e: EepromError) -> Self {
        StorageError::Eeprom(e)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record {
    pub factors: CalibrationFactors,
    pub sequence: u16,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Slot {
    Blank,
    Invalid,
    Valid(Record),
}

impl Record {
    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut bytes = [0u8; SLOT_LEN];
        bytes[0..4].copy_from_slice(&self.factors.voltage.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.factors.current.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.sequence.to_le_bytes());
        let crc = crc16_ccitt_false(&bytes[..PAYLOAD_LEN]);
        bytes[10..12].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; SLOT_LEN]) -> Slot {
        if bytes.iter().all(|b| *b == ERASED) {
            return Slot::Blank;
        }
        let crc = u16::from_le_bytes([bytes[10], bytes[11]]);
        if crc != crc16_ccitt_false(&bytes[..PAYLOAD_LEN]) {
            return Slot::Invalid;
        }
        let factors = CalibrationFactors {
            voltage: f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            current: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        };
        if !factors.is_valid() {
            return Slot::Invalid;
        }
        Slot::Valid(Record {
            factors,
            sequence: u16::from_le_bytes([bytes[8], bytes[9]]),
        })
    }
}

/// Sequence numbers wrap, the newer one is at most half the range ahead
fn is_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Index and record of the newest valid slot
fn newest(slots: &[Slot; 2]) -> Option<(usize, Record)> {
    match (slots[0], slots[1]) {
        (Slot::Valid(a), Slot::Valid(b)) => {
            if is_newer(b.sequence, a.sequence) {
                Some((1, b))
            } else {
                Some((0, a))
            }
        }
        (Slot::Valid(a), _) => Some((0, a)),
        (_, Slot::Valid(b)) => Some((1, b)),
        _ => None,
    }
}

pub struct CalibrationStore<E: Eeprom> {
    eeprom: E,
}

impl<E: Eeprom> CalibrationStore<E> {
    pub fn new(eeprom: E) -> Self {
        CalibrationStore { eeprom }
    }

    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    pub fn eeprom_mut(&mut self) -> &mut E {
        &mut self.eeprom
    }

    /// Stored factors, or identity when nothing usable is stored. Never fails.
    pub fn load(&mut self) -> (CalibrationFactors, LoadSource) {
        let slots = match self.read_slots() {
            Ok(slots) => slots,
            Err(e) => {
                warn!("calibration store unreadable ({}), using identity", e);
                return (CalibrationFactors::IDENTITY, LoadSource::ReadFailed);
            }
        };

        if let Some((index, record)) = newest(&slots) {
            if slots.iter().any(|slot| *slot == Slot::Invalid) {
                debug!("calibration slot {} is torn, the other one is used", 1 - index);
            }
            info!(
                "calibration loaded from slot {}: voltage {} current {}",
                index, record.factors.voltage, record.factors.current
            );
            (record.factors, LoadSource::Stored)
        } else if slots.iter().all(|slot| *slot == Slot::Blank) {
            info!("calibration store is blank, using identity");
            (CalibrationFactors::IDENTITY, LoadSource::Blank)
        } else {
            warn!("calibration store is corrupt, using identity");
            (CalibrationFactors::IDENTITY, LoadSource::Corrupt)
        }
    }

    /// Writes both factors as one record into the older slot and verifies it.
    pub fn save(&mut self, factors: &CalibrationFactors) -> Result<(), StorageError> {
        if !factors.is_valid() {
            return Err(StorageError::InvalidFactors);
        }
        let current = newest(&self.read_slots()?);
        let (index, sequence) = match current {
            Some((index, record)) => (1 - index, record.sequence.wrapping_add(1)),
            None => (0, 0),
        };

        let bytes = Record {
            factors: *factors,
            sequence,
        }
        .encode();
        self.eeprom.write(SLOT_OFFSETS[index], &bytes)?;

        let mut check = [0u8; SLOT_LEN];
        self.eeprom.read(SLOT_OFFSETS[index], &mut check)?;
        if check != bytes {
            return Err(StorageError::VerifyFailed);
        }
        debug!("calibration saved to slot {} with sequence {}", index, sequence);
        Ok(())
    }

    fn read_slots(&mut self) -> Result<[Slot; 2], EepromError> {
        let mut slots = [Slot::Blank; 2];
        for (slot, offset) in slots.iter_mut().zip(SLOT_OFFSETS.iter()) {
            let mut bytes = [0u8; SLOT_LEN];
            self.eeprom.read(*offset, &mut bytes)?;
            *slot = Record::decode(&bytes);
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod test {
    use crate::calibration::CalibrationFactors;
    use crate::storage::{is_newer, Record, Slot, SLOT_LEN};

    #[test]
    fn voltage_factor_comes_first_in_the_record() {
        let bytes = Record {
            factors: CalibrationFactors {
                voltage: 1.25,
                current: 0.5,
            },
            sequence: 7,
        }
        .encode();
        assert_eq!(bytes[0..4], 1.25f32.to_le_bytes());
        assert_eq!(bytes[4..8], 0.5f32.to_le_bytes());
        assert_eq!(bytes[8..10], [7, 0]);
    }

    #[test]
    fn flipped_bit_invalidates_the_record() {
        let mut bytes = Record {
            factors: CalibrationFactors::IDENTITY,
            sequence: 1,
        }
        .encode();
        bytes[2] ^= 0x10;
        assert_eq!(Record::decode(&bytes), Slot::Invalid);
    }

    #[test]
    fn erased_slot_is_blank() {
        assert_eq!(Record::decode(&[0xFF; SLOT_LEN]), Slot::Blank);
    }

    #[test]
    fn non_positive_factor_is_rejected_even_with_valid_crc() {
        let bytes = Record {
            factors: CalibrationFactors {
                voltage: -1.0,
                current: 1.0,
            },
            sequence: 3,
        }
        .encode();
        assert_eq!(Record::decode(&bytes), Slot::Invalid);
    }

    #[test]
    fn sequence_comparison_survives_wrap_around() {
        assert!(is_newer(1, 0));
        assert!(is_newer(0, u16::MAX));
        assert!(!is_newer(u16::MAX, 0));
        assert!(!is_newer(5, 5));
    }
}
