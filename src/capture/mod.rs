pub mod decode;
#[cfg(feature = "live-capture")]
pub mod sniffer;

pub use decode::{decode_ethernet, is_dns_port, parse_dns_question};
#[cfg(feature = "live-capture")]
pub use sniffer::{list_network_devices, NetworkInterface, PacketSniffer};
