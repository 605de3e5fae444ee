//! Modbus protocol limits shared by the PDU, framing and connection layers

/// MBAP header length without the unit identifier: TID(2) + PID(2) + LEN(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Largest legal MBAP length field: unit id (1) + PDU (253)
pub const MAX_MBAP_LENGTH: usize = 254;

/// Largest legal PDU
pub const MAX_PDU_SIZE: usize = 253;

/// FC03/FC04 quantity limit
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

/// FC01/FC02 quantity limit
pub const MODBUS_MAX_READ_COILS: u16 = 2000;

/// Smallest RTU response: unit(1) + FC(1) + exception code(1) + CRC(2)
pub const RTU_MIN_FRAME_LEN: usize = 5;

/// Exception bit set in the function code of an error response
pub const EXCEPTION_FLAG: u8 = 0x80;
