//! Modbus framing for TCP (MBAP header) and RTU (unit + CRC)
//!
//! The link carries exactly one outstanding request, so the codec tracks a single pending
//! transaction instead of a table. A response that does not match it is a protocol error and the
//! link manager drops the connection.

use crc::{Crc, CRC_16_MODBUS};
use errors::{protocol_error, BridgeResult};
use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MBAP_HEADER_LEN, RTU_MIN_FRAME_LEN};
use crate::pdu::ModbusPdu;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS over `data`
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Frame layout on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// MBAP header, no checksum
    Tcp,
    /// Unit id prefix, CRC suffix
    Rtu,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    transaction_id: u16,
    unit_id: u8,
    function_code: u8,
}

/// Builds request frames and validates response frames
#[derive(Debug)]
pub struct FrameCodec {
    mode: FrameMode,
    next_transaction_id: u16,
    pending: Option<PendingRequest>,
}

impl FrameCodec {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            next_transaction_id: 1,
            pending: None,
        }
    }

    /// Get next transaction ID - wraps naturally from 0xFFFF to 0x0000
    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a complete request frame and remember it as the pending transaction
    pub fn build_frame(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let function_code = pdu.function_code().unwrap_or(0);
        let transaction_id = match self.mode {
            FrameMode::Tcp => self.next_transaction_id(),
            FrameMode::Rtu => 0,
        };
        self.pending = Some(PendingRequest {
            transaction_id,
            unit_id,
            function_code,
        });

        match self.mode {
            FrameMode::Tcp => {
                let length = (pdu.len() + 1) as u16; // PDU length + unit_id
                let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
                frame.extend_from_slice(&transaction_id.to_be_bytes());
                frame.extend_from_slice(&0u16.to_be_bytes()); // protocol_id
                frame.extend_from_slice(&length.to_be_bytes());
                frame.push(unit_id);
                frame.extend_from_slice(pdu.as_slice());

                debug!(
                    "TCP TX frame: tid={:04X} unit={} FC={:02X} len={}",
                    transaction_id,
                    unit_id,
                    function_code,
                    frame.len()
                );
                frame
            },
            FrameMode::Rtu => {
                let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
                frame.push(unit_id);
                frame.extend_from_slice(pdu.as_slice());
                let crc = crc16(&frame);
                frame.extend_from_slice(&crc.to_le_bytes());

                debug!(
                    "RTU TX frame: unit={} FC={:02X} len={} CRC={:04X}",
                    unit_id,
                    function_code,
                    frame.len(),
                    crc
                );
                frame
            },
        }
    }

    /// Validate a response frame against the pending request and extract its PDU
    pub fn parse_frame(&mut self, data: &[u8]) -> BridgeResult<ModbusPdu> {
        let pending = self.pending.take().ok_or_else(|| {
            protocol_error!("Response received with no request pending")
        })?;

        let (unit_id, pdu) = match self.mode {
            FrameMode::Tcp => Self::parse_tcp_frame(data, &pending)?,
            FrameMode::Rtu => Self::parse_rtu_frame(data)?,
        };

        if unit_id != pending.unit_id {
            return Err(protocol_error!(
                "Unit id mismatch: expected {}, got {}",
                pending.unit_id, unit_id
            ));
        }

        let response_fc = pdu.function_code().unwrap_or(0) & !EXCEPTION_FLAG;
        if response_fc != pending.function_code {
            return Err(protocol_error!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                pending.function_code, response_fc
            ));
        }

        Ok(pdu)
    }

    fn parse_tcp_frame(data: &[u8], pending: &PendingRequest) -> BridgeResult<(u8, ModbusPdu)> {
        if data.len() < MBAP_HEADER_LEN + 2 {
            return Err(protocol_error!("TCP frame too short"));
        }

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]);
        let unit_id = data[6];

        debug!(
            "TCP RX frame: tid={:04X} pid={:04X} len={} unit={}",
            transaction_id, protocol_id, length, unit_id
        );

        if protocol_id != 0 {
            return Err(protocol_error!(
                "Invalid protocol ID: expected 0, got {protocol_id}"
            ));
        }

        if data.len() != MBAP_HEADER_LEN + usize::from(length) {
            return Err(protocol_error!(
                "Invalid TCP frame length: expected {}, got {}",
                MBAP_HEADER_LEN + usize::from(length),
                data.len()
            ));
        }

        if transaction_id != pending.transaction_id {
            return Err(protocol_error!(
                "Transaction id mismatch: expected {:04X}, got {:04X}",
                pending.transaction_id, transaction_id
            ));
        }

        let pdu = ModbusPdu::from_slice(&data[MBAP_HEADER_LEN + 1..])?;
        Ok((unit_id, pdu))
    }

    fn parse_rtu_frame(data: &[u8]) -> BridgeResult<(u8, ModbusPdu)> {
        if data.len() < RTU_MIN_FRAME_LEN {
            return Err(protocol_error!("RTU frame too short"));
        }

        let frame_len = data.len();
        let received_crc = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);
        let calculated_crc = crc16(&data[..frame_len - 2]);
        if received_crc != calculated_crc {
            return Err(protocol_error!(
                "CRC mismatch: expected 0x{calculated_crc:04X}, got 0x{received_crc:04X}"
            ));
        }

        debug!("RTU RX frame: unit={} len={}", data[0], frame_len);
        let pdu = ModbusPdu::from_slice(&data[1..frame_len - 2])?;
        Ok((data[0], pdu))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::pdu::{FunctionCode, ReadRequest};

    fn read_pdu() -> ModbusPdu {
        ReadRequest::new(1, FunctionCode::ReadHoldingRegisters, 0x0100, 1)
            .unwrap()
            .to_pdu()
            .unwrap()
    }

    #[test]
    fn test_crc16_reference_vector() {
        // 01 03 00 00 00 01 -> CRC 0x0A84, sent as 84 0A
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
    }

    #[test]
    fn test_tcp_round_trip_with_matching_transaction() {
        let mut codec = FrameCodec::new(FrameMode::Tcp);
        let request = codec.build_frame(1, &read_pdu());
        assert_eq!(&request[..7], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01]);

        let response = [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x6B, 0x67];
        let pdu = codec.parse_frame(&response).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x02, 0x6B, 0x67]);
    }

    #[test]
    fn test_tcp_rejects_stale_transaction() {
        let mut codec = FrameCodec::new(FrameMode::Tcp);
        codec.build_frame(1, &read_pdu());
        let response = [0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x01];
        assert!(codec.parse_frame(&response).is_err());
    }

    #[test]
    fn test_transaction_id_wraps() {
        let mut codec = FrameCodec::new(FrameMode::Tcp);
        codec.next_transaction_id = u16::MAX;
        assert_eq!(codec.next_transaction_id(), u16::MAX);
        assert_eq!(codec.next_transaction_id(), 0);
    }

    #[test]
    fn test_rtu_frame_carries_crc() {
        let mut codec = FrameCodec::new(FrameMode::Rtu);
        let frame = codec.build_frame(1, &read_pdu());
        let crc = crc16(&frame[..frame.len() - 2]);
        assert_eq!(&frame[frame.len() - 2..], &crc.to_le_bytes());

        let mut response = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
        let crc = crc16(&response);
        response.extend_from_slice(&crc.to_le_bytes());
        let pdu = codec.parse_frame(&response).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x02, 0x00, 0x2A]);
    }

    #[test]
    fn test_rtu_rejects_bad_crc_and_wrong_unit() {
        let mut codec = FrameCodec::new(FrameMode::Rtu);
        codec.build_frame(1, &read_pdu());
        assert!(codec
            .parse_frame(&[0x01, 0x03, 0x02, 0x00, 0x2A, 0x00, 0x00])
            .is_err());

        codec.build_frame(1, &read_pdu());
        let mut response = vec![0x02, 0x03, 0x02, 0x00, 0x2A];
        let crc = crc16(&response);
        response.extend_from_slice(&crc.to_le_bytes());
        assert!(codec.parse_frame(&response).is_err());
    }

    #[test]
    fn test_exception_response_passes_framing() {
        let mut codec = FrameCodec::new(FrameMode::Tcp);
        codec.build_frame(1, &read_pdu());
        let response = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let pdu = codec.parse_frame(&response).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
    }
}
