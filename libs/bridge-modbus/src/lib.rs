//! Modbus side of the SNMP-Modbus bridge
//!
//! Provides the single-link Modbus master used by the resolver:
//!
//! ```text
//! bridge-modbus
//!     ├── LinkManager (serialized access, lazy connect, retry window)
//!     ├── ModbusSession / ModbusConnection (TCP and serial RTU streams)
//!     ├── FrameCodec (MBAP header / CRC handling)
//!     ├── ReadRequest / parse_read_response (FC01-04 PDUs)
//!     └── codec (register words -> typed number -> scaled value)
//! ```
//!
//! Only read function codes are implemented; the bridge never writes to the device.

pub mod codec;
pub mod connection;
pub mod constants;
pub mod frame;
pub mod link;
pub mod pdu;

pub use codec::{decode, process, DataType, Number, Processing, Scaling, COMMUNICATION_OK};
pub use connection::{Parity, RtuConnector, SerialSettings, TcpConnector};
pub use link::{Connector, LinkManager, LinkSettings, LinkState, LinkStatus, Transport};
pub use pdu::{FunctionCode, ReadRequest};
