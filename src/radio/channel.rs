//! # Channel and Configuration Model
//!
//! Value types describing a PHY channel and the per-operation RX/TX settings.
//! The driver copies what it needs out of these values; they carry no behaviour
//! beyond the validation predicates used by the state machine.
//!
//! ## Channel header layout
//!
//! ```text
//! Bit 7-4: frequency band
//! Bit 3-2: rate class
//! Bit 1-0: coding scheme
//! ```

use serde::{Deserialize, Serialize};

/// Lowest transmit power accepted by `TxConfig::is_valid`, in dBm
pub const EIRP_MIN_DBM: i8 = -39;
/// Highest transmit power accepted by `TxConfig::is_valid`, in dBm
pub const EIRP_MAX_DBM: i8 = 10;

/// Highest supported syncword class
pub const SYNCWORD_CLASS_MAX: u8 = 1;

/// Channel coding scheme
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelCoding {
    Pn9 = 0,
    Rfu = 1,
    FecPn9 = 2,
    Cw = 3,
}

impl ChannelCoding {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ChannelCoding::Pn9,
            1 => ChannelCoding::Rfu,
            2 => ChannelCoding::FecPn9,
            _ => ChannelCoding::Cw,
        }
    }
}

/// Channel rate class
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelClass {
    LoRate = 0,
    Rfu = 1,
    NormalRate = 2,
    HiRate = 3,
}

impl ChannelClass {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ChannelClass::LoRate,
            1 => ChannelClass::Rfu,
            2 => ChannelClass::NormalRate,
            _ => ChannelClass::HiRate,
        }
    }
}

/// Frequency band. Unknown band codes are kept so a header round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelBand {
    Rfu,
    Band433,
    Band868,
    Band915,
    Reserved(u8),
}

impl ChannelBand {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0 => ChannelBand::Rfu,
            2 => ChannelBand::Band433,
            3 => ChannelBand::Band868,
            4 => ChannelBand::Band915,
            other => ChannelBand::Reserved(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            ChannelBand::Rfu => 0,
            ChannelBand::Band433 => 2,
            ChannelBand::Band868 => 3,
            ChannelBand::Band915 => 4,
            ChannelBand::Reserved(bits) => bits & 0x0F,
        }
    }

    /// Highest center frequency index defined for the band
    pub fn max_center_freq_index(self) -> Option<u8> {
        match self {
            ChannelBand::Band433 => Some(68),
            ChannelBand::Band868 => Some(u8::MAX),
            ChannelBand::Band915 => Some(u8::MAX),
            ChannelBand::Rfu | ChannelBand::Reserved(_) => None,
        }
    }
}

/// Identity of a physical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub coding: ChannelCoding,
    pub class: ChannelClass,
    pub band: ChannelBand,
    pub center_freq_index: u8,
}

impl ChannelId {
    pub const fn new(
        coding: ChannelCoding,
        class: ChannelClass,
        band: ChannelBand,
        center_freq_index: u8,
    ) -> Self {
        Self {
            coding,
            class,
            band,
            center_freq_index,
        }
    }

    /// Decode a packed channel header byte plus center frequency index
    pub fn from_header(header: u8, center_freq_index: u8) -> Self {
        Self {
            coding: ChannelCoding::from_bits(header),
            class: ChannelClass::from_bits(header >> 2),
            band: ChannelBand::from_bits(header >> 4),
            center_freq_index,
        }
    }

    /// Packed channel header byte
    pub fn header(&self) -> u8 {
        (self.coding as u8) | ((self.class as u8) << 2) | (self.band.bits() << 4)
    }

    pub fn is_valid(&self) -> bool {
        if self.coding == ChannelCoding::Rfu || self.class == ChannelClass::Rfu {
            return false;
        }
        match self.band.max_center_freq_index() {
            Some(max) => self.center_freq_index <= max,
            None => false,
        }
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new(
            ChannelCoding::Pn9,
            ChannelClass::NormalRate,
            ChannelBand::Band868,
            0,
        )
    }
}

/// Settings applied when entering RX mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RxConfig {
    pub channel_id: ChannelId,
    pub syncword_class: u8,
}

impl RxConfig {
    pub fn new(channel_id: ChannelId, syncword_class: u8) -> Self {
        Self {
            channel_id,
            syncword_class,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_id.is_valid() && self.syncword_class <= SYNCWORD_CLASS_MAX
    }
}

/// Settings applied to a single transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxConfig {
    pub channel_id: ChannelId,
    pub syncword_class: u8,
    /// Requested transmit power in dBm, [-39, +10]
    pub eirp: i8,
}

impl TxConfig {
    pub fn new(channel_id: ChannelId, syncword_class: u8, eirp: i8) -> Self {
        Self {
            channel_id,
            syncword_class,
            eirp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_id.is_valid()
            && self.syncword_class <= SYNCWORD_CLASS_MAX
            && (EIRP_MIN_DBM..=EIRP_MAX_DBM).contains(&self.eirp)
    }

    /// Explain why a config is rejected, if it is
    pub(crate) fn rejection(&self) -> Option<String> {
        if !self.channel_id.is_valid() {
            Some(format!("unsupported channel {:?}", self.channel_id))
        } else if self.syncword_class > SYNCWORD_CLASS_MAX {
            Some(format!("unsupported syncword class {}", self.syncword_class))
        } else if !(EIRP_MIN_DBM..=EIRP_MAX_DBM).contains(&self.eirp) {
            Some(format!(
                "EIRP {} dBm outside [{EIRP_MIN_DBM}, {EIRP_MAX_DBM}]",
                self.eirp
            ))
        } else {
            None
        }
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self::new(ChannelId::default(), 0, EIRP_MAX_DBM)
    }
}

impl From<TxConfig> for RxConfig {
    fn from(cfg: TxConfig) -> Self {
        RxConfig::new(cfg.channel_id, cfg.syncword_class)
    }
}
