//! Just enough of a Modbus RTU master to read holding registers.

use crc::{Crc, CRC_16_MODBUS};
use embedded_io::{Read, ReadExactError, Write};
use sensor_base::{make_error_string, ErrorString};

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModbusError {
    #[error("Serial port failed: {0}")]
    Io(ErrorString),
    #[error("Device stopped answering halfway through a frame")]
    UnexpectedEof,
    #[error("Checksum mismatch, frame says {expected:#06x}, computed {got:#06x}")]
    Crc { expected: u16, got: u16 },
    #[error("Device answered with exception code {0}")]
    Exception(u8),
    #[error("Answer does not fit the request")]
    WrongResponse,
}

impl<E: embedded_io::Error> From<ReadExactError<E>> for ModbusError {
    fn from(err: ReadExactError<E>) -> Self {
        match err {
            ReadExactError::UnexpectedEof => Self::UnexpectedEof,
            ReadExactError::Other(e) => Self::Io(make_error_string(e.kind())),
        }
    }
}

impl From<ModbusError> for sensor_base::Error {
    fn from(err: ModbusError) -> Self {
        match err {
            ModbusError::UnexpectedEof => Self::NoResponse,
            ModbusError::Io(e) => Self::Bus(e),
            ModbusError::Exception(_) => Self::Device(make_error_string(err)),
            other => Self::Parse(make_error_string(other)),
        }
    }
}

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS, transmitted low byte first.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

pub struct Master<S> {
    port: S,
}

impl<S: Read + Write> Master<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    pub fn into_inner(self) -> S {
        self.port
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), ModbusError> {
        let io = |e: S::Error| ModbusError::Io(make_error_string(embedded_io::Error::kind(&e)));
        self.port.write_all(frame).map_err(io)?;
        self.port.flush().map_err(io)
    }

    /// Reads `N` consecutive 16 bit registers starting at `start`.
    pub fn read_holding_registers<const N: usize>(
        &mut self,
        device: u8,
        start: u16,
    ) -> Result<[u16; N], ModbusError> {
        let count = u16::try_from(N).map_err(|_| ModbusError::WrongResponse)?;
        let mut request: heapless::Vec<u8, 8> = heapless::Vec::new();
        request.push(device).ok();
        request.push(READ_HOLDING_REGISTERS).ok();
        request.extend_from_slice(&start.to_be_bytes()).ok();
        request.extend_from_slice(&count.to_be_bytes()).ok();
        let crc = crc16(&request);
        request.extend_from_slice(&crc.to_le_bytes()).ok();
        self.write(&request)?;

        let mut header = [0u8; 3];
        self.port.read_exact(&mut header)?;
        if header[0] != device {
            return Err(ModbusError::WrongResponse);
        }
        if header[1] == READ_HOLDING_REGISTERS | EXCEPTION {
            let mut crc = [0u8; 2];
            self.port.read_exact(&mut crc)?;
            return Err(ModbusError::Exception(header[2]));
        }
        if header[1] != READ_HOLDING_REGISTERS || usize::from(header[2]) != 2 * N {
            return Err(ModbusError::WrongResponse);
        }

        let mut body: heapless::Vec<u8, 256> = heapless::Vec::new();
        body.extend_from_slice(&header).ok();
        body.resize(3 + 2 * N + 2, 0)
            .map_err(|()| ModbusError::WrongResponse)?;
        self.port.read_exact(&mut body[3..])?;

        let (frame, crc) = body.split_at(3 + 2 * N);
        let expected = u16::from_le_bytes([crc[0], crc[1]]);
        let got = crc16(frame);
        if expected != got {
            return Err(ModbusError::Crc { expected, got });
        }

        let mut registers = [0u16; N];
        for (reg, bytes) in registers.iter_mut().zip(frame[3..].chunks_exact(2)) {
            *reg = u16::from_be_bytes([bytes[0], bytes[1]]);
        }
        Ok(registers)
    }

    /// A big-endian IEEE 754 float spread over two registers.
    pub fn read_f32(&mut self, device: u8, start: u16) -> Result<f32, ModbusError> {
        let [high, low] = self.read_holding_registers::<2>(device, start)?;
        Ok(f32::from_bits((u32::from(high) << 16) | u32::from(low)))
    }
}

#[cfg(test)]
pub(crate) fn response_frame(device: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![device, READ_HOLDING_REGISTERS, data.len() as u8];
    frame.extend_from_slice(data);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockSerial;

    #[test]
    fn crc_matches_reference_frame() {
        // read 2 registers at 0x0100 from device 1
        let frame = [0x01, 0x03, 0x01, 0x00, 0x00, 0x02];
        assert_eq!(crc16(&frame).to_le_bytes(), [0xC5, 0xF7]);
    }

    #[test]
    fn reads_float() {
        let data = 1.5f32.to_be_bytes();
        let port = MockSerial::default().reply(&response_frame(1, &data));
        let mut master = Master::new(port);
        assert_eq!(master.read_f32(1, 0x0100), Ok(1.5));
        let port = master.into_inner();
        assert_eq!(&port.written[..6], &[0x01, 0x03, 0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let mut frame = response_frame(1, &1.5f32.to_be_bytes());
        frame[4] ^= 0xFF;
        let mut master = Master::new(MockSerial::default().reply(&frame));
        assert!(matches!(
            master.read_f32(1, 0x0100),
            Err(ModbusError::Crc { .. })
        ));
    }

    #[test]
    fn exception_is_reported() {
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        let mut master = Master::new(MockSerial::default().reply(&frame));
        assert_eq!(master.read_f32(1, 0x0100), Err(ModbusError::Exception(2)));
    }

    #[test]
    fn silence_is_eof() {
        let mut master = Master::new(MockSerial::default());
        assert_eq!(master.read_f32(1, 0x0100), Err(ModbusError::UnexpectedEof));
    }
}
