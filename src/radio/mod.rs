pub mod channel;
pub mod config;
pub mod driver;
pub mod hal;
pub mod irq;
pub mod lifecycle;
pub mod packet;
pub mod pool;
pub mod rssi;

pub use channel::{ChannelBand, ChannelClass, ChannelCoding, ChannelId, RxConfig, TxConfig};
pub use config::{ConfigError, DriverConfig, RadioSettings};
pub use driver::{RadioDriver, RadioMode, RadioStats};
pub use irq::{event_channel, run_event_loop, EventQueue, IrqLine, RadioEvent};
pub use lifecycle::{RadioCallbacks, RadioClient};
pub use packet::{CrcStatus, PacketBuffer, PacketMeta, RxMetadata, TxMetadata, MAX_PACKET_LEN};
pub use pool::BufferPool;
pub use rssi::{RssiReading, RSSI_INVALID};
