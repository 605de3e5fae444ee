//! Modbus PDU for the read function codes
//!
//! Uses a fixed-size stack array so a request/response pair never touches the heap until the
//! decoded words are handed back to the caller.

use std::fmt;

use errors::{protocol_error, BridgeError, BridgeResult};
use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, MAX_PDU_SIZE, MODBUS_MAX_READ_COILS, MODBUS_MAX_READ_REGISTERS,
};

/// Read function codes supported by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
}

impl FunctionCode {
    /// Raw function code byte
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// FC01/FC02 address single bits rather than 16-bit registers
    #[inline]
    pub fn is_bit_access(self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }

    /// Largest quantity a single request may ask for
    pub fn max_quantity(self) -> u16 {
        if self.is_bit_access() {
            MODBUS_MAX_READ_COILS
        } else {
            MODBUS_MAX_READ_REGISTERS
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = BridgeError;

    fn try_from(value: u8) -> BridgeResult<Self> {
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            other => Err(BridgeError::invalid(
                "function_code",
                format!("unsupported function code {other} (expected 1, 2, 3 or 4)"),
            )),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02}", self.code())
    }
}

/// A single read transaction against one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub unit_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    /// Create a validated read request
    pub fn new(
        unit_id: u8,
        function: FunctionCode,
        address: u16,
        quantity: u16,
    ) -> BridgeResult<Self> {
        if quantity == 0 || quantity > function.max_quantity() {
            return Err(BridgeError::invalid(
                "quantity",
                format!(
                    "{function} quantity {quantity} outside 1..={}",
                    function.max_quantity()
                ),
            ));
        }
        if u32::from(address) + u32::from(quantity) - 1 > u32::from(u16::MAX) {
            return Err(BridgeError::invalid(
                "address",
                format!("0x{address:04X} + {quantity} runs past the end of the address space"),
            ));
        }
        Ok(Self {
            unit_id,
            function,
            address,
            quantity,
        })
    }

    /// Encode the request PDU: FC + start address + quantity
    pub fn to_pdu(&self) -> BridgeResult<ModbusPdu> {
        let pdu = PduBuilder::new()
            .function_code(self.function.code())?
            .address(self.address)?
            .quantity(self.quantity)?
            .build();
        Ok(pdu)
    }

    /// Byte count a well-formed response must declare
    pub fn expected_byte_count(&self) -> usize {
        if self.function.is_bit_access() {
            usize::from(self.quantity).div_ceil(8)
        } else {
            usize::from(self.quantity) * 2
        }
    }
}

/// Stack-allocated PDU
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> BridgeResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(protocol_error!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            ));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> BridgeResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(protocol_error!("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> BridgeResult<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> BridgeResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> BridgeResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> BridgeResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }
}

/// Extract the payload of a read response.
///
/// A byte count that does not match the request is rejected.
///
/// - FC03/FC04 yield one word per register, in transmission order
/// - FC01/FC02 yield one word per requested bit, `0` or `1`
pub fn parse_read_response(pdu: &ModbusPdu, request: &ReadRequest) -> BridgeResult<Vec<u16>> {
    let data = pdu.as_slice();
    let expected_fc = request.function.code();

    let Some(fc) = pdu.function_code() else {
        return Err(protocol_error!("Empty response PDU"));
    };

    if fc == expected_fc | EXCEPTION_FLAG {
        let exception_code = pdu.exception_code().unwrap_or(0);
        debug!(
            "{} exception response: code={:02X}",
            request.function.description(),
            exception_code
        );
        return Err(BridgeError::ModbusException {
            function_code: expected_fc,
            exception_code,
        });
    }

    if fc != expected_fc {
        return Err(protocol_error!(
            "Function code mismatch: expected {expected_fc:02X}, got {fc:02X}"
        ));
    }

    if data.len() < 2 {
        return Err(BridgeError::Decode(
            "Response PDU has no byte count".to_string(),
        ));
    }

    let byte_count = usize::from(data[1]);
    let expected_bytes = request.expected_byte_count();
    if byte_count != expected_bytes {
        return Err(BridgeError::Decode(format!(
            "Byte count mismatch for {}: expected {expected_bytes}, got {byte_count}",
            request.function
        )));
    }

    let payload = &data[2..];
    if payload.len() < byte_count {
        return Err(BridgeError::Decode(format!(
            "Truncated payload: declared {byte_count} bytes, received {}",
            payload.len()
        )));
    }

    let words = if request.function.is_bit_access() {
        (0..usize::from(request.quantity))
            .map(|i| u16::from((payload[i / 8] >> (i % 8)) & 0x01))
            .collect()
    } else {
        payload[..byte_count]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    };

    Ok(words)
}
