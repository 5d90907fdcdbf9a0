// make `std` available when testing
#![cfg_attr(not(test), no_std)]
pub mod bsp;
pub mod calibration;
pub mod charger;
pub mod control;
pub mod crc;
pub mod measurement;
pub mod safety;
pub mod storage;
