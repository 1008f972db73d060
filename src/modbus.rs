//! Modbus RTU framing for function 0x04, read input registers.
//!
//! Request:   slave | 0x04 | start (BE) | quantity (BE) | CRC (LE)
//! Response:  slave | 0x04 | byte count | registers (BE) ... | CRC (LE)
//! Exception: slave | 0x84 | exception code | CRC (LE)

use crc::{Crc, CRC_16_MODBUS};
use heapless::Vec;

pub const READ_INPUT_REGISTERS: u8 = 0x04;
const EXCEPTION_FLAG: u8 = 0x80;

/// Protocol limit for a single read
pub const MAX_REGISTERS: usize = 125;

pub const REQUEST_LEN: usize = 8;

const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 2;
const EXCEPTION_LEN: usize = 5;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub type Registers = Vec<u16, MAX_REGISTERS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    BufferTooSmall,
    InvalidQuantity,
    Crc,
    UnexpectedSlave(u8),
    UnexpectedFunction(u8),
    /// Slave answered with an exception code
    Exception(u8),
    Length,
    TooManyRegisters,
}

impl core::fmt::Display for ModbusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ModbusError::BufferTooSmall => write!(f, "Buffer too small"),
            ModbusError::InvalidQuantity => write!(f, "Invalid register quantity"),
            ModbusError::Crc => write!(f, "CRC mismatch"),
            ModbusError::UnexpectedSlave(id) => write!(f, "Unexpected slave 0x{:02x}", id),
            ModbusError::UnexpectedFunction(code) => write!(f, "Unexpected function 0x{:02x}", code),
            ModbusError::Exception(code) => write!(f, "Exception 0x{:02x}", code),
            ModbusError::Length => write!(f, "Invalid frame length"),
            ModbusError::TooManyRegisters => write!(f, "Too many registers"),
        }
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Write a read-input-registers request into `buf`, returning its length
pub fn encode_read_input_registers(
    slave: u8,
    start: u16,
    quantity: u16,
    buf: &mut [u8],
) -> Result<usize, ModbusError> {
    if quantity == 0 || quantity as usize > MAX_REGISTERS {
        return Err(ModbusError::InvalidQuantity);
    }
    let Some(frame) = buf.get_mut(..REQUEST_LEN) else {
        return Err(ModbusError::BufferTooSmall);
    };

    let [start_hi, start_lo] = start.to_be_bytes();
    let [quantity_hi, quantity_lo] = quantity.to_be_bytes();
    frame[..6].copy_from_slice(&[slave, READ_INPUT_REGISTERS, start_hi, start_lo, quantity_hi, quantity_lo]);

    let crc = crc16(&frame[..6]).to_le_bytes();
    frame[6..].copy_from_slice(&crc);
    Ok(REQUEST_LEN)
}

/// Decode a response accumulated so far. `WouldBlock` means more bytes are
/// needed; anything else is final.
pub fn decode_read_response(slave: u8, frame: &[u8]) -> nb::Result<Registers, ModbusError> {
    if frame.len() < HEADER_LEN {
        return Err(nb::Error::WouldBlock);
    }
    if frame[0] != slave {
        return Err(nb::Error::Other(ModbusError::UnexpectedSlave(frame[0])));
    }

    let function = frame[1];
    if function == READ_INPUT_REGISTERS | EXCEPTION_FLAG {
        if frame.len() < EXCEPTION_LEN {
            return Err(nb::Error::WouldBlock);
        }
        check_crc(&frame[..EXCEPTION_LEN])?;
        return Err(nb::Error::Other(ModbusError::Exception(frame[2])));
    }
    if function != READ_INPUT_REGISTERS {
        return Err(nb::Error::Other(ModbusError::UnexpectedFunction(function)));
    }

    let byte_count = frame[2] as usize;
    if byte_count % 2 != 0 {
        return Err(nb::Error::Other(ModbusError::Length));
    }
    if byte_count / 2 > MAX_REGISTERS {
        return Err(nb::Error::Other(ModbusError::TooManyRegisters));
    }

    let total = HEADER_LEN + byte_count + CRC_LEN;
    if frame.len() < total {
        return Err(nb::Error::WouldBlock);
    }
    if frame.len() > total {
        return Err(nb::Error::Other(ModbusError::Length));
    }
    check_crc(frame)?;

    let mut registers = Registers::new();
    for word in frame[HEADER_LEN..HEADER_LEN + byte_count].chunks_exact(2) {
        registers
            .push(u16::from_be_bytes([word[0], word[1]]))
            .map_err(|_| nb::Error::Other(ModbusError::TooManyRegisters))?;
    }
    Ok(registers)
}

fn check_crc(frame: &[u8]) -> Result<(), nb::Error<ModbusError>> {
    let (body, received) = frame.split_at(frame.len() - CRC_LEN);
    if crc16(body).to_le_bytes() != received {
        return Err(nb::Error::Other(ModbusError::Crc));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a well-formed response carrying `registers`
    pub(crate) fn response_frame(slave: u8, registers: &[u16]) -> std::vec::Vec<u8> {
        let mut frame = vec![slave, READ_INPUT_REGISTERS, (registers.len() * 2) as u8];
        for register in registers {
            frame.extend_from_slice(&register.to_be_bytes());
        }
        let crc = crc16(&frame).to_le_bytes();
        frame.extend_from_slice(&crc);
        frame
    }

    #[test]
    fn test_encode_request() {
        let mut buf = [0u8; 16];
        let len = encode_read_input_registers(0x01, 0, 10, &mut buf).unwrap();

        // Reference frame for slave 1, start 0, quantity 10
        assert_eq!(&buf[..len], &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]);
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        let mut small = [0u8; 4];
        assert_eq!(
            encode_read_input_registers(0x01, 0, 10, &mut small),
            Err(ModbusError::BufferTooSmall)
        );

        let mut buf = [0u8; 8];
        assert_eq!(encode_read_input_registers(0x01, 0, 0, &mut buf), Err(ModbusError::InvalidQuantity));
        assert_eq!(encode_read_input_registers(0x01, 0, 126, &mut buf), Err(ModbusError::InvalidQuantity));
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let frame = response_frame(0x01, &[2300, 0, 1500]);

        for len in 0..frame.len() {
            assert_eq!(decode_read_response(0x01, &frame[..len]), Err(nb::Error::WouldBlock));
        }
        assert_eq!(decode_read_response(0x01, &frame).unwrap().as_slice(), &[2300, 0, 1500]);
    }

    #[test]
    fn test_decode_rejects_corrupted_crc() {
        let mut frame = response_frame(0x01, &[1, 2]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert_eq!(decode_read_response(0x01, &frame), Err(nb::Error::Other(ModbusError::Crc)));
    }

    #[test]
    fn test_decode_exception() {
        let mut frame = vec![0x01, 0x84, 0x02];
        let crc = crc16(&frame).to_le_bytes();
        frame.extend_from_slice(&crc);

        assert_eq!(
            decode_read_response(0x01, &frame),
            Err(nb::Error::Other(ModbusError::Exception(0x02)))
        );
    }

    #[test]
    fn test_decode_rejects_foreign_frames() {
        let frame = response_frame(0x02, &[1]);
        assert_eq!(
            decode_read_response(0x01, &frame),
            Err(nb::Error::Other(ModbusError::UnexpectedSlave(0x02)))
        );

        assert_eq!(
            decode_read_response(0x01, &[0x01, 0x03, 0x02]),
            Err(nb::Error::Other(ModbusError::UnexpectedFunction(0x03)))
        );

        let mut trailing = response_frame(0x01, &[1]);
        trailing.push(0);
        assert_eq!(decode_read_response(0x01, &trailing), Err(nb::Error::Other(ModbusError::Length)));
    }
}
