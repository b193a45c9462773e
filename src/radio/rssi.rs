//! # RSSI Sampler
//!
//! Tracks whether the ambient RSSI reading is valid for the RX configuration the
//! radio is currently armed with. A reading only becomes valid after the radio
//! entered RX and the transceiver reported that the measurement settled; any
//! re-arm (new RX config, RX resumed after TX) starts over.
//!
//! There is no wait-until-valid primitive. Callers are told through the
//! rssi-valid callback.

use crate::radio::irq::RxEpoch;

/// Sentinel returned when no valid RSSI sample exists
pub const RSSI_INVALID: i16 = 0x7FFF;

/// A signed RSSI reading in dBm, or the invalid sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiReading {
    dbm: i16,
    valid: bool,
}

impl RssiReading {
    pub const INVALID: RssiReading = RssiReading {
        dbm: RSSI_INVALID,
        valid: false,
    };

    /// A valid reading. The sentinel value itself is not representable and is
    /// saturated one below it.
    pub fn new(dbm: i16) -> Self {
        Self {
            dbm: dbm.min(RSSI_INVALID - 1),
            valid: true,
        }
    }

    /// Round a measured level to the nearest i16 dBm
    pub fn from_dbm(dbm: f32) -> Self {
        if dbm.is_nan() {
            return Self::INVALID;
        }
        let rounded = dbm.round().clamp(i16::MIN as f32, (RSSI_INVALID - 1) as f32);
        Self::new(rounded as i16)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn dbm(&self) -> Option<i16> {
        self.valid.then_some(self.dbm)
    }

    /// The reading as an i16, `RSSI_INVALID` when not valid
    pub fn raw(&self) -> i16 {
        self.dbm
    }
}

impl Default for RssiReading {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Validity bookkeeping for the current RX arm
///
/// A settle notification makes a report due; the reading only turns valid
/// when the consumer confirms that report, right before the rssi-valid
/// callback runs.
#[derive(Debug, Default)]
pub(crate) struct RssiSampler {
    armed: Option<RxEpoch>,
    reporting: bool,
    valid: bool,
}

impl RssiSampler {
    /// RX (re-)entered with a new epoch: reading is invalid until it settles
    pub fn arm(&mut self, epoch: RxEpoch) {
        self.armed = Some(epoch);
        self.reporting = false;
        self.valid = false;
    }

    /// Radio left RX
    pub fn invalidate(&mut self) {
        self.armed = None;
        self.reporting = false;
        self.valid = false;
    }

    /// Settle notification for `epoch`. Returns true when a report is now due;
    /// notifications for an older arm, or repeated ones, are ignored.
    pub fn settle(&mut self, epoch: RxEpoch) -> bool {
        if self.armed == Some(epoch) && !self.reporting && !self.valid {
            self.reporting = true;
            true
        } else {
            false
        }
    }

    /// The report for `epoch` is about to be delivered. Returns true and marks
    /// the reading valid if that arm is still current.
    pub fn confirm(&mut self, epoch: RxEpoch) -> bool {
        if self.armed == Some(epoch) && self.reporting {
            self.reporting = false;
            self.valid = true;
            true
        } else {
            false
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
