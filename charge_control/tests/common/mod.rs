#![allow(dead_code)]

use charge_control::bsp::eeprom::{Eeprom, EepromError};

pub const EEPROM_SIZE: usize = 64;

/// EEPROM which resides in memory. Can tear a write after a number of bytes
/// or silently drop writes.
#[derive(Clone)]
pub struct TestEeprom {
    pub bytes: Vec<u8>,
    /// Remaining bytes before the next write fails halfway
    pub write_budget: Option<usize>,
    /// Writes report success but nothing is stored
    pub stuck: bool,
    pub fail_reads: bool,
}

impl TestEeprom {
    pub fn blank() -> Self {
        TestEeprom::with_bytes(vec![0xFF; EEPROM_SIZE])
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        TestEeprom {
            bytes,
            write_budget: None,
            stuck: false,
            fail_reads: false,
        }
    }

    pub fn tear_after(mut self, bytes: usize) -> Self {
        self.write_budget = Some(bytes);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0xFF)
    }
}

impl Eeprom for TestEeprom {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), EepromError> {
        if self.fail_reads {
            return Err(EepromError::ReadFailed);
        }
        let end = offset + buf.len();
        if end > self.bytes.len() {
            return Err(EepromError::OutOfBounds);
        }
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), EepromError> {
        if offset + data.len() > self.bytes.len() {
            return Err(EepromError::OutOfBounds);
        }
        if self.stuck {
            return Ok(());
        }
        for (i, byte) in data.iter().enumerate() {
            if let Some(budget) = self.write_budget {
                if budget == 0 {
                    return Err(EepromError::WriteFailed);
                }
                self.write_budget = Some(budget - 1);
            }
            self.bytes[offset + i] = *byte;
        }
        Ok(())
    }
}
