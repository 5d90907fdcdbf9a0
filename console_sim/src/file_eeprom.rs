use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use charge_control::bsp::eeprom::{Eeprom, EepromError};

pub const EEPROM_SIZE: usize = 256;

/// EEPROM backed by an image file, so calibration survives restarts of the
/// simulator. A missing file reads as erased memory.
pub struct FileEeprom {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileEeprom {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut image = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(e),
        };
        image.resize(EEPROM_SIZE, 0xFF);
        Ok(FileEeprom {
            path: path.to_path_buf(),
            image,
        })
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, EepromError> {
        let end = offset.checked_add(len).ok_or(EepromError::OutOfBounds)?;
        if end > self.image.len() {
            return Err(EepromError::OutOfBounds);
        }
        Ok(offset..end)
    }
}

impl Eeprom for FileEeprom {
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), EepromError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), EepromError> {
        let range = self.range(offset, data.len())?;
        self.image[range].copy_from_slice(data);
        fs::write(&self.path, &self.image).map_err(|e| {
            warn!("cannot write {}: {}", self.path.display(), e);
            EepromError::WriteFailed
        })
    }
}
