mod common;

#[cfg(test)]
mod tests {
    use charge_control::bsp::eeprom::EepromError;
    use charge_control::calibration::CalibrationFactors;
    use charge_control::storage::{
        CalibrationStore, LoadSource, Record, StorageError, SLOT_LEN, SLOT_OFFSETS,
    };

    use crate::common::TestEeprom;

    const FIRST: CalibrationFactors = CalibrationFactors {
        voltage: 1.02,
        current: 0.97,
    };
    const SECOND: CalibrationFactors = CalibrationFactors {
        voltage: 1.05,
        current: 1.01,
    };

    fn slot(store: &CalibrationStore<TestEeprom>, index: usize) -> &[u8] {
        let offset = SLOT_OFFSETS[index];
        &store.eeprom().bytes[offset..offset + SLOT_LEN]
    }

    #[test]
    fn blank_store_loads_identity() {
        let mut store = CalibrationStore::new(TestEeprom::blank());
        assert_eq!(
            store.load(),
            (CalibrationFactors::IDENTITY, LoadSource::Blank)
        );
    }

    #[test]
    fn saved_factors_are_loaded_after_reset() {
        let mut store = CalibrationStore::new(TestEeprom::blank());
        store.save(&FIRST).unwrap();

        // a fresh store over the same memory, as after a reboot
        let mut rebooted = CalibrationStore::new(store.eeprom().clone());
        assert_eq!(rebooted.load(), (FIRST, LoadSource::Stored));
    }

    #[test]
    fn saves_alternate_between_slots() {
        let mut store = CalibrationStore::new(TestEeprom::blank());

        store.save(&FIRST).unwrap();
        let after_first = slot(&store, 0).to_vec();
        assert!(slot(&store, 1).iter().all(|b| *b == 0xFF));

        store.save(&SECOND).unwrap();
        // the previous record stays in place
        assert_eq!(slot(&store, 0), &after_first[..]);
        assert!(slot(&store, 1).iter().any(|b| *b != 0xFF));
        assert_eq!(store.load(), (SECOND, LoadSource::Stored));

        store.save(&FIRST).unwrap();
        assert_ne!(slot(&store, 0), &after_first[..]);
        assert_eq!(store.load(), (FIRST, LoadSource::Stored));
    }

    #[test]
    fn torn_write_keeps_the_previous_pair() {
        let mut store = CalibrationStore::new(TestEeprom::blank());
        store.save(&FIRST).unwrap();

        // power is lost after 5 bytes of the next record
        store.eeprom_mut().write_budget = Some(5);
        assert_eq!(
            store.save(&SECOND),
            Err(StorageError::Eeprom(EepromError::WriteFailed))
        );

        let mut rebooted = CalibrationStore::new(store.eeprom().clone());
        assert_eq!(rebooted.load(), (FIRST, LoadSource::Stored));
    }

    #[test]
    fn garbage_in_both_slots_is_reported_as_corrupt() {
        let mut store = CalibrationStore::new(TestEeprom::with_bytes(vec![0x00; 64]));
        assert_eq!(
            store.load(),
            (CalibrationFactors::IDENTITY, LoadSource::Corrupt)
        );
    }

    #[test]
    fn unreadable_store_falls_back_to_identity() {
        let mut eeprom = TestEeprom::blank();
        eeprom.fail_reads = true;
        let mut store = CalibrationStore::new(eeprom);
        assert_eq!(
            store.load(),
            (CalibrationFactors::IDENTITY, LoadSource::ReadFailed)
        );
    }

    #[test]
    fn invalid_factors_are_never_written() {
        let mut store = CalibrationStore::new(TestEeprom::blank());
        let zero = CalibrationFactors {
            voltage: 0.0,
            current: 1.0,
        };
        assert_eq!(store.save(&zero), Err(StorageError::InvalidFactors));
        assert!(store.eeprom().is_blank());
    }

    #[test]
    fn lost_write_fails_verification() {
        let mut eeprom = TestEeprom::blank();
        eeprom.stuck = true;
        let mut store = CalibrationStore::new(eeprom);
        assert_eq!(store.save(&FIRST), Err(StorageError::VerifyFailed));
    }

    #[test]
    fn newest_record_wins_across_sequence_wrap() {
        let mut bytes = vec![0xFF; 64];
        let old = Record {
            factors: FIRST,
            sequence: u16::MAX,
        }
        .encode();
        let new = Record {
            factors: SECOND,
            sequence: 0,
        }
        .encode();
        bytes[SLOT_OFFSETS[0]..SLOT_OFFSETS[0] + SLOT_LEN].copy_from_slice(&old);
        bytes[SLOT_OFFSETS[1]..SLOT_OFFSETS[1] + SLOT_LEN].copy_from_slice(&new);

        let mut store = CalibrationStore::new(TestEeprom::with_bytes(bytes));
        assert_eq!(store.load(), (SECOND, LoadSource::Stored));

        // the next save replaces the older slot A
        store.save(&FIRST).unwrap();
        assert_eq!(slot(&store, 1), &new[..]);
        assert_eq!(store.load(), (FIRST, LoadSource::Stored));
    }
}
