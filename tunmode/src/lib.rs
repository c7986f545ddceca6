pub mod blocklist;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod packet;
pub mod session;
pub mod sessions;
pub mod stats;
pub mod test_util;
pub mod worker;

pub use blocklist::{Blocklist, BlocklistUpdate, EmptyUpdatePolicy, UpdateOutcome};
pub use bridge::{HostBridge, HostNotifier, NoopNotifier};
pub use config::TunnelConfig;
pub use controller::{TunnelController, TunnelState};
pub use device::{DeviceFactory, TunDevice, TunOpener, TunnelDevice};
pub use dispatch::{Dispatcher, SessionManager};
pub use error::{ConfigError, DeviceError, TunnelError};
pub use packet::{Packet, TransportProtocol};
pub use stats::StatsSnapshot;
