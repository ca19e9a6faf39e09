use embedded_hal::i2c::{self, ErrorKind};
use sensor_base::{make_error_string, Error};

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum I2cError {
    #[error("Bus error")]
    Bus,
    #[error("Arbitration lost")]
    Arbitration,
    #[error("ACK not received (either to the address or to a data byte)")]
    Nack,
    #[error("Overrun error")]
    Overrun,
    #[error("Unknown I2C error")]
    Other,
}

impl I2cError {
    pub fn from_hal(err: impl i2c::Error) -> Self {
        match err.kind() {
            ErrorKind::Bus => Self::Bus,
            ErrorKind::ArbitrationLoss => Self::Arbitration,
            ErrorKind::NoAcknowledge(_) => Self::Nack,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

impl From<I2cError> for Error {
    fn from(err: I2cError) -> Self {
        Error::Bus(make_error_string(err))
    }
}

pub(crate) fn i2c_err(err: impl i2c::Error) -> Error {
    I2cError::from_hal(err).into()
}

pub(crate) fn io_err(err: impl embedded_io::Error) -> Error {
    Error::bus(err.kind())
}

/// Reads bytes until `terminator`, which is not stored. Returns false if
/// the port ran dry before anything was read. Bytes that do not fit in
/// `line` are dropped.
pub(crate) fn read_line<S: embedded_io::Read, const N: usize>(
    port: &mut S,
    terminator: u8,
    line: &mut heapless::Vec<u8, N>,
) -> Result<bool, Error> {
    line.clear();
    let mut byte = [0u8];
    loop {
        let n = port.read(&mut byte).map_err(io_err)?;
        if n == 0 {
            return Ok(!line.is_empty());
        }
        if byte[0] == terminator {
            return Ok(true);
        }
        line.push(byte[0]).ok();
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::convert::Infallible;

    use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation, SevenBitAddress};

    /// Records writes, answers reads from a queue. An empty queue or a
    /// missing device gives a NACK.
    #[derive(Debug, Default)]
    pub struct MockI2c {
        pub address: u8,
        pub writes: Vec<Vec<u8>>,
        pub reads: VecDeque<Vec<u8>>,
    }

    impl MockI2c {
        pub fn new(address: u8) -> Self {
            Self {
                address,
                ..Default::default()
            }
        }

        pub fn respond(mut self, bytes: &[u8]) -> Self {
            self.reads.push_back(bytes.to_vec());
            self
        }

        pub fn written(&self) -> Vec<String> {
            self.writes
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }
    }

    impl ErrorType for MockI2c {
        type Error = ErrorKind;
    }

    impl I2c<SevenBitAddress> for MockI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let nack = ErrorKind::NoAcknowledge(embedded_hal::i2c::NoAcknowledgeSource::Address);
            if address != self.address {
                return Err(nack);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push(bytes.to_vec()),
                    Operation::Read(buf) => {
                        let response = self.reads.pop_front().ok_or(nack)?;
                        buf.fill(0);
                        let n = response.len().min(buf.len());
                        buf[..n].copy_from_slice(&response[..n]);
                    }
                }
            }
            Ok(())
        }
    }

    /// Serial port answering every write with the next queued response.
    #[derive(Debug, Default)]
    pub struct MockSerial {
        pub written: Vec<u8>,
        pub rx: VecDeque<u8>,
        pub replies: VecDeque<Vec<u8>>,
    }

    impl MockSerial {
        pub fn reply(mut self, bytes: &[u8]) -> Self {
            self.replies.push_back(bytes.to_vec());
            self
        }

        pub fn preload(mut self, bytes: &[u8]) -> Self {
            self.rx.extend(bytes);
            self
        }

        pub fn commands(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl embedded_io::ErrorType for MockSerial {
        type Error = Infallible;
    }

    impl embedded_io::Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let mut n = 0;
            while n < buf.len() {
                let Some(byte) = self.rx.pop_front() else {
                    break;
                };
                buf[n] = byte;
                n += 1;
            }
            Ok(n)
        }
    }

    impl embedded_io::Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.written.extend_from_slice(buf);
            if let Some(reply) = self.replies.pop_front() {
                self.rx.extend(reply);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    pub struct NoDelay;

    impl embedded_hal::delay::DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }
}
