//! Modbus Connection Management
//!
//! TCP and serial RTU byte streams plus the [`Connector`] implementations that open them. Nothing
//! in this module applies a timeout: the link manager bounds connect and read as a whole, so a
//! stalled peer is abandoned at the transaction boundary.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use errors::{protocol_error, BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::constants::{self, EXCEPTION_FLAG};
use crate::frame::{FrameCodec, FrameMode};
use crate::link::{Connector, Transport};
use crate::pdu::{parse_read_response, ReadRequest};

/// Modbus connection type
#[derive(Debug)]
pub enum ModbusConnection {
    /// TCP connection
    Tcp(TcpStream),
    /// Serial RTU connection
    Rtu(SerialStream),
}

impl ModbusConnection {
    /// Create a TCP connection
    pub async fn connect_tcp(host: &str, port: u16) -> BridgeResult<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| BridgeError::ConnectionFailed {
                endpoint: addr.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }

        info!("TCP connected: {}", addr);
        Ok(ModbusConnection::Tcp(stream))
    }

    /// Open a serial RTU port
    pub fn connect_rtu(settings: &SerialSettings) -> BridgeResult<Self> {
        debug!("RTU: {} @{}baud", settings.port, settings.baud_rate);

        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        let stop_bits = match settings.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };

        let port = tokio_serial::new(settings.port.as_str(), settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| BridgeError::ConnectionFailed {
                endpoint: settings.port.clone(),
                reason: e.to_string(),
            })?;

        info!("RTU opened: {}", settings.port);
        Ok(ModbusConnection::Rtu(port))
    }

    /// Send data
    pub async fn send(&mut self, data: &[u8]) -> BridgeResult<()> {
        match self {
            ModbusConnection::Tcp(stream) => {
                stream.write_all(data).await?;
                debug!("TCP TX: {}B", data.len());
            },
            ModbusConnection::Rtu(port) => {
                port.write_all(data).await?;
                port.flush().await?;
                debug!("RTU TX: {}B", data.len());
            },
        }
        Ok(())
    }

    /// Receive exactly one complete frame
    pub async fn receive_frame(&mut self) -> BridgeResult<Vec<u8>> {
        match self {
            ModbusConnection::Tcp(stream) => {
                // [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][PDU(N)]
                let mut header = [0u8; constants::MBAP_HEADER_LEN];
                stream.read_exact(&mut header).await?;

                let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
                if length < 2 || length > constants::MAX_MBAP_LENGTH {
                    return Err(protocol_error!(
                        "Invalid TCP frame length: {length}"
                    ));
                }

                let mut frame = vec![0u8; constants::MBAP_HEADER_LEN + length];
                frame[..constants::MBAP_HEADER_LEN].copy_from_slice(&header);
                stream
                    .read_exact(&mut frame[constants::MBAP_HEADER_LEN..])
                    .await?;

                debug!("TCP RX: {}B", frame.len());
                Ok(frame)
            },
            ModbusConnection::Rtu(port) => {
                // [Unit ID(1)][FC(1)][Byte count(1)][Data(N)][CRC(2)]
                // or, for an exception, [Unit ID(1)][FC|0x80(1)][Code(1)][CRC(2)]
                let mut head = [0u8; 3];
                port.read_exact(&mut head).await?;

                let remaining = if head[1] & EXCEPTION_FLAG != 0 {
                    2
                } else {
                    usize::from(head[2]) + 2
                };

                let mut frame = Vec::with_capacity(head.len() + remaining);
                frame.extend_from_slice(&head);
                frame.resize(head.len() + remaining, 0);
                port.read_exact(&mut frame[head.len()..]).await?;

                debug!("RTU RX: {}B", frame.len());
                Ok(frame)
            },
        }
    }

    pub fn frame_mode(&self) -> FrameMode {
        match self {
            ModbusConnection::Tcp(_) => FrameMode::Tcp,
            ModbusConnection::Rtu(_) => FrameMode::Rtu,
        }
    }
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl FromStr for Parity {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "e" | "even" => Ok(Parity::Even),
            "o" | "odd" => Ok(Parity::Odd),
            other => Err(BridgeError::invalid(
                "parity",
                format!("'{other}' is not one of N, E, O"),
            )),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Parity::None => "N",
            Parity::Even => "E",
            Parity::Odd => "O",
        };
        f.write_str(label)
    }
}

/// Serial line settings for an RTU link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} {}{}{}",
            self.port, self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Opens Modbus TCP sessions
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> BridgeResult<Box<dyn Transport>> {
        let connection = ModbusConnection::connect_tcp(&self.host, self.port).await?;
        Ok(Box::new(ModbusSession::new(connection, self.endpoint())))
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// Opens Modbus RTU sessions
#[derive(Debug, Clone)]
pub struct RtuConnector {
    pub settings: SerialSettings,
}

#[async_trait]
impl Connector for RtuConnector {
    async fn connect(&self) -> BridgeResult<Box<dyn Transport>> {
        let connection = ModbusConnection::connect_rtu(&self.settings)?;
        Ok(Box::new(ModbusSession::new(connection, self.endpoint())))
    }

    fn endpoint(&self) -> String {
        format!("rtu://{}", self.settings)
    }
}

/// An open connection plus its framing state
#[derive(Debug)]
pub struct ModbusSession {
    connection: ModbusConnection,
    codec: FrameCodec,
    endpoint: String,
}

impl ModbusSession {
    pub fn new(connection: ModbusConnection, endpoint: String) -> Self {
        let codec = FrameCodec::new(connection.frame_mode());
        Self {
            connection,
            codec,
            endpoint,
        }
    }
}

#[async_trait]
impl Transport for ModbusSession {
    async fn read(&mut self, request: &ReadRequest) -> BridgeResult<Vec<u16>> {
        let pdu = request.to_pdu()?;
        let frame = self.codec.build_frame(request.unit_id, &pdu);
        self.connection.send(&frame).await?;

        let response = self.connection.receive_frame().await?;
        let pdu = self.codec.parse_frame(&response)?;
        parse_read_response(&pdu, request)
    }

    async fn close(&mut self) {
        if let ModbusConnection::Tcp(stream) = &mut self.connection {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown {}: {}", self.endpoint, e);
            }
        }
        debug!("Closed {}", self.endpoint);
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::pdu::FunctionCode;
    use tokio::net::TcpListener;

    #[test]
    fn test_parity_parsing() {
        assert_eq!("N".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!(" O ".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("M".parse::<Parity>().is_err());
    }

    #[test]
    fn test_endpoints() {
        let tcp = TcpConnector {
            host: "192.168.1.10".to_string(),
            port: 502,
        };
        assert_eq!(tcp.endpoint(), "tcp://192.168.1.10:502");

        let rtu = RtuConnector {
            settings: SerialSettings {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 9600,
                data_bits: 8,
                parity: Parity::None,
                stop_bits: 1,
            },
        };
        assert_eq!(rtu.endpoint(), "rtu:///dev/ttyUSB0@9600 8N1");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ModbusConnection::connect_tcp("127.0.0.1", port)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionFailed { .. }));
        assert!(err.is_communication_failure());
    }

    #[tokio::test]
    async fn test_session_reads_holding_register_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[6..], &[0x01, 0x03, 0x01, 0x00, 0x00, 0x01]);

            let mut response = vec![request[0], request[1], 0x00, 0x00, 0x00, 0x05, 0x01];
            response.extend_from_slice(&[0x03, 0x02, 0x6B, 0x67]);
            socket.write_all(&response).await.unwrap();
        });

        let connector = TcpConnector {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut session = connector.connect().await.unwrap();
        let request = ReadRequest::new(1, FunctionCode::ReadHoldingRegisters, 0x100, 1).unwrap();
        assert_eq!(session.read(&request).await.unwrap(), vec![27495]);
        session.close().await;
        server.await.unwrap();
    }
}
