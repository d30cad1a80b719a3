//! Modbus RTU framing for the RS-485 soil pH probe.

use thiserror::Error;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// Slave ids tried, in order, when the probe's address is unknown.
pub const SLAVE_IDS: [u8; 8] = [0x01, 0x02, 0x03, 0x10, 0x20, 0x30, 0x40, 0x50];

/// Slave id, function, byte count, two data bytes, CRC.
pub const PH_RESPONSE_LEN: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    #[error("short frame: {0} bytes")]
    Short(usize),
    #[error("reply from slave {got:#04x}, expected {expected:#04x}")]
    WrongSlave { expected: u8, got: u8 },
    #[error("unexpected function {0:#04x}")]
    WrongFunction(u8),
    #[error("CRC mismatch: frame {frame:#06x}, computed {computed:#06x}")]
    Crc { frame: u16, computed: u16 },
    #[error("no response")]
    Timeout,
}

/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the CRC low byte first.
pub fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

pub fn read_holding_request(slave: u8, register: u16, count: u16) -> [u8; 8] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [cnt_hi, cnt_lo] = count.to_be_bytes();
    let mut frame = [slave, READ_HOLDING_REGISTERS, reg_hi, reg_lo, cnt_hi, cnt_lo, 0, 0];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// Register 0, one word: pH × 100.
pub fn ph_request(slave: u8) -> [u8; 8] {
    read_holding_request(slave, 0x0000, 1)
}

pub fn parse_ph_response(slave: u8, frame: &[u8]) -> Result<f64, ModbusError> {
    if frame.len() < PH_RESPONSE_LEN {
        return Err(ModbusError::Short(frame.len()));
    }
    let frame = &frame[..PH_RESPONSE_LEN];
    if frame[0] != slave {
        return Err(ModbusError::WrongSlave {
            expected: slave,
            got: frame[0],
        });
    }
    if frame[1] != READ_HOLDING_REGISTERS {
        return Err(ModbusError::WrongFunction(frame[1]));
    }

    let computed = crc16(&frame[..5]);
    let received = u16::from_le_bytes([frame[5], frame[6]]);
    if computed != received {
        return Err(ModbusError::Crc {
            frame: received,
            computed,
        });
    }

    let raw = u16::from_be_bytes([frame[3], frame[4]]);
    Ok(f64::from(raw) / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_of_known_frame() {
        // 01 03 00 00 00 01 -> CRC 0x0A84, sent as 84 0A.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        assert_eq!(ph_request(0x01), [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_parse_valid_response() {
        let frame = with_crc(vec![0x02, 0x03, 0x02, 0x02, 0x8A]);
        assert_eq!(parse_ph_response(0x02, &frame), Ok(6.5));
    }

    #[test]
    fn test_rejects_bad_frames() {
        let good = with_crc(vec![0x02, 0x03, 0x02, 0x02, 0x8A]);

        assert_eq!(parse_ph_response(0x02, &good[..4]), Err(ModbusError::Short(4)));
        assert!(matches!(parse_ph_response(0x10, &good), Err(ModbusError::WrongSlave { .. })));

        let mut corrupt = good.clone();
        corrupt[4] ^= 0xFF;
        assert!(matches!(parse_ph_response(0x02, &corrupt), Err(ModbusError::Crc { .. })));

        let exception = with_crc(vec![0x02, 0x83, 0x02, 0x00, 0x00]);
        assert_eq!(parse_ph_response(0x02, &exception), Err(ModbusError::WrongFunction(0x83)));
    }
}
