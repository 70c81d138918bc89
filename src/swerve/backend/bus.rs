// Serial field-bus protocol for the STS smart-servo family
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Every write is acknowledged with a status packet, but configuration
// registers apply asynchronously; callers confirm them by polling the
// read-back (see `swerve::convergence`).

use std::io::{Read, Write};
use std::time::Duration;

use serialport;
use tracing::debug;

/// Default serial configuration for the servo bus
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Broadcast id (no device answers a broadcast)
const BROADCAST_ID: u8 = 0xFE;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    SyncWrite = 0x83,
}

/// Register map for the STS drive/steer servos and encoder heads.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    // EEPROM area (persists across power cycles)
    ModelNumber = 3, // 2 bytes, read-only
    Id = 5,          // 1 byte
    BaudRate = 6,    // 1 byte
    Direction = 9,   // 1 byte: 0=counter-clockwise positive, 1=inverted
    ZeroOffset = 10, // 2 bytes: absolute encoder zero offset, ticks

    // Gain registers, fixed-point (value = gain * 1000)
    PGain = 21,  // 2 bytes
    IGain = 23,  // 2 bytes
    DGain = 25,  // 2 bytes
    FfGain = 27, // 2 bytes

    CurrentLimit = 29,   // 2 bytes, mA
    NominalVoltage = 31, // 1 byte, tenths of a volt; 0 = compensation off

    // RAM area (volatile)
    OperatingMode = 33, // 1 byte: 0=position, 1=velocity, 2=pwm
    BrakeMode = 34,     // 1 byte: 0=coast, 1=brake
    TorqueEnable = 40,  // 1 byte: 0=off, 1=on
    GoalPosition = 42,  // 4 bytes, signed multi-turn ticks
    GoalVelocity = 46,  // 2 bytes, sign-magnitude ticks/s
    GoalPwm = 48,       // 2 bytes, sign-magnitude, permille of full output
    Lock = 55,          // 1 byte: 0=unlocked, 1=locked
    // Writable: writing seeds the multi-turn counter without moving the shaft
    PresentPosition = 56, // 4 bytes, signed multi-turn ticks
    PresentVelocity = 60, // 2 bytes, sign-magnitude ticks/s, read-only
    PresentPwm = 62,      // 2 bytes, sign-magnitude permille, read-only
}

/// Operating modes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Position = 0,
    Velocity = 1,
    Pwm = 2,
}

/// Bus-level communication errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from device {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Device {id} returned error status: 0x{status:02X}")]
    DeviceError { id: u8, status: u8 },

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: u8 },
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// Byte transport under the bus. Real deployments use a serial port; tests
/// substitute a scripted in-memory transport.
pub trait BusTransport: Read + Write + Send {}

impl<T: Read + Write + Send> BusTransport for T {}

/// One physical serial bus shared by every servo on it.
pub struct ServoBus {
    port: Box<dyn BusTransport>,
}

impl ServoBus {
    /// Opens the bus on a serial port at the default baudrate.
    pub fn open(port_name: &str) -> BusResult<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> BusResult<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;
        Ok(Self { port: Box::new(port) })
    }

    /// Wraps an already-open transport. Used by tests.
    pub fn with_transport(port: Box<dyn BusTransport>) -> Self {
        Self { port }
    }

    /// Checksum over id, length, instruction and params (header excluded).
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());
        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);
        let body = &packet[2..];
        packet.push(Self::checksum(body));
        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> BusResult<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Reads one status packet, returning its parameter bytes.
    fn read_response(&mut self, expected_id: u8) -> BusResult<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout { id: expected_id }
            } else {
                BusError::Io(e)
            }
        })?;
        if header != HEADER {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;
        if id != expected_id {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("id mismatch: expected {}, got {}", expected_id, id),
            });
        }
        // Shortest legal status packet body is error byte + checksum.
        if length < 2 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("length byte too small: {}", length),
            });
        }

        // error byte + params + checksum
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;

        let mut body = vec![id, length as u8];
        body.extend_from_slice(&remaining[..remaining.len() - 1]);
        if Self::checksum(&body) != remaining[remaining.len() - 1] {
            return Err(BusError::ChecksumMismatch { id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(BusError::DeviceError { id, status });
        }
        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    /// Sends an instruction and waits for the status packet.
    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> BusResult<Vec<u8>> {
        let packet = Self::build_packet(id, instruction, params);
        self.send_packet(&packet)?;
        self.read_response(id)
    }

    /// Checks whether a device answers on the bus.
    pub fn ping(&mut self, id: u8) -> BusResult<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> BusResult<()> {
        debug!("write u8 to {}: reg={:?}, value={}", id, register, value);
        self.transact(id, Instruction::Write, &[register as u8, value])?;
        Ok(())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> BusResult<()> {
        debug!("write u16 to {}: reg={:?}, value={}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, lo, hi])?;
        Ok(())
    }

    /// Signed 16-bit write. The servo family uses sign-magnitude encoding:
    /// bit 15 is direction, bits 0-14 are magnitude.
    pub fn write_i16(&mut self, id: u8, register: Register, value: i16) -> BusResult<()> {
        self.write_u16(id, register, encode_sign_magnitude(value))
    }

    /// Signed 32-bit (multi-turn position) write, two's complement LE.
    pub fn write_i32(&mut self, id: u8, register: Register, value: i32) -> BusResult<()> {
        debug!("write i32 to {}: reg={:?}, value={}", id, register, value);
        let [b0, b1, b2, b3] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register as u8, b0, b1, b2, b3])?;
        Ok(())
    }

    pub fn read_u8(&mut self, id: u8, register: Register) -> BusResult<u8> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 1])?;
        match response.first() {
            Some(&value) => Ok(value),
            None => Err(BusError::InvalidResponse {
                id,
                reason: "empty response".to_string(),
            }),
        }
    }

    pub fn read_u16(&mut self, id: u8, register: Register) -> BusResult<u16> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 2])?;
        if response.len() < 2 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("expected 2 bytes, got {}", response.len()),
            });
        }
        Ok(u16::from_le_bytes([response[0], response[1]]))
    }

    pub fn read_i16(&mut self, id: u8, register: Register) -> BusResult<i16> {
        Ok(decode_sign_magnitude(self.read_u16(id, register)?))
    }

    pub fn read_i32(&mut self, id: u8, register: Register) -> BusResult<i32> {
        let response = self.transact(id, Instruction::Read, &[register as u8, 4])?;
        if response.len() < 4 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("expected 4 bytes, got {}", response.len()),
            });
        }
        Ok(i32::from_le_bytes([
            response[0],
            response[1],
            response[2],
            response[3],
        ]))
    }

    /// Writes the same register on several devices in one broadcast frame.
    /// No status packets come back for a sync write.
    pub fn sync_write_i16(&mut self, register: Register, data: &[(u8, i16)]) -> BusResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut params = vec![register as u8, 2];
        for &(id, value) in data {
            let [lo, hi] = encode_sign_magnitude(value).to_le_bytes();
            params.push(id);
            params.push(lo);
            params.push(hi);
        }
        let packet = Self::build_packet(BROADCAST_ID, Instruction::SyncWrite, &params);
        debug!("sync write to {} devices: reg={:?}", data.len(), register);
        self.send_packet(&packet)
    }
}

fn encode_sign_magnitude(value: i16) -> u16 {
    if value >= 0 {
        value as u16
    } else {
        0x8000 | (-(value as i32)) as u16
    }
}

fn decode_sign_magnitude(raw: u16) -> i16 {
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 { -magnitude } else { magnitude }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Scripted transport: pops canned response frames, records writes.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        inner: Arc<Mutex<ScriptState>>,
    }

    #[derive(Default)]
    struct ScriptState {
        responses: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Queues a well-formed status packet from `id` with `params`.
        pub(crate) fn push_status(&self, id: u8, params: &[u8]) {
            let mut state = self.inner.lock().unwrap();
            let length = (params.len() + 2) as u8; // error byte + checksum
            let mut body = vec![id, length, 0x00];
            body.extend_from_slice(params);
            let checksum = ServoBus::checksum(&body);
            state.responses.extend(HEADER);
            state.responses.extend(body);
            state.responses.push_back(checksum);
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.inner.lock().unwrap().written.clone()
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.inner.lock().unwrap();
            if state.responses.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted data"));
            }
            let mut n = 0;
            while n < buf.len() {
                match state.responses.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.lock().unwrap().written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn scripted_bus() -> (ServoBus, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let bus = ServoBus::with_transport(Box::new(transport.clone()));
        (bus, transport)
    }

    #[test]
    fn checksum_matches_protocol() {
        let data = [1u8, 4, 0x03, 30, 0, 2];
        assert_eq!(ServoBus::checksum(&data), 215);
    }

    #[test]
    fn sign_magnitude_round_trip() {
        assert_eq!(encode_sign_magnitude(0), 0);
        assert_eq!(encode_sign_magnitude(100), 100);
        assert_eq!(encode_sign_magnitude(-100), 0x8064);
        assert_eq!(encode_sign_magnitude(-1), 0x8001);
        assert_eq!(encode_sign_magnitude(i16::MIN), 0x8000 | 0x8000u16);

        assert_eq!(decode_sign_magnitude(0x8064), -100);
        assert_eq!(decode_sign_magnitude(100), 100);
    }

    #[test]
    fn ping_packet_layout() {
        let packet = ServoBus::build_packet(1, Instruction::Ping, &[]);
        assert_eq!(packet.len(), 6);
        assert_eq!(&packet[..2], &HEADER);
        assert_eq!(packet[2], 1); // id
        assert_eq!(packet[3], 2); // instruction + checksum
        assert_eq!(packet[4], 0x01);
    }

    #[test]
    fn read_u16_parses_status_params() {
        let (mut bus, transport) = scripted_bus();
        transport.push_status(7, &[0x34, 0x12]);
        assert_eq!(bus.read_u16(7, Register::PresentVelocity).unwrap(), 0x1234);
    }

    #[test]
    fn read_i32_parses_multi_turn_position() {
        let (mut bus, transport) = scripted_bus();
        transport.push_status(7, &(-70000i32).to_le_bytes());
        assert_eq!(bus.read_i32(7, Register::PresentPosition).unwrap(), -70000);
    }

    #[test]
    fn ping_timeout_is_not_an_error() {
        let (mut bus, _transport) = scripted_bus();
        assert!(!bus.ping(9).unwrap());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let (mut bus, transport) = scripted_bus();
        transport.push_status(3, &[0x01]);
        {
            // Flip the checksum byte at the tail of the queued frame
            let mut state = transport.inner.lock().unwrap();
            let last = state.responses.back_mut().unwrap();
            *last ^= 0xFF;
        }
        match bus.read_u8(3, Register::TorqueEnable) {
            Err(BusError::ChecksumMismatch { id: 3 }) => {}
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn truncated_length_byte_is_rejected() {
        let (mut bus, transport) = scripted_bus();
        // A corrupt frame claiming a zero-length body must not panic the
        // read path; it has no room for even the error byte and checksum.
        {
            let mut state = transport.inner.lock().unwrap();
            state.responses.extend(HEADER);
            state.responses.extend([7u8, 0]);
        }
        match bus.read_u16(7, Register::PresentVelocity) {
            Err(BusError::InvalidResponse { id: 7, reason }) => {
                assert!(reason.contains("length"), "unexpected reason: {reason}");
            }
            other => panic!("expected invalid response, got {other:?}"),
        }
    }

    #[test]
    fn device_error_status_surfaces() {
        let (mut bus, transport) = scripted_bus();
        // Hand-build a status packet with a non-zero error byte
        let mut state_body = vec![4u8, 2, 0x20];
        let checksum = ServoBus::checksum(&state_body);
        state_body.push(checksum);
        {
            let mut state = transport.inner.lock().unwrap();
            state.responses.extend(HEADER);
            state.responses.extend(state_body);
        }
        match bus.write_u8(4, Register::TorqueEnable, 1) {
            Err(BusError::DeviceError { id: 4, status: 0x20 }) => {}
            other => panic!("expected device error, got {other:?}"),
        }
    }

    #[test]
    fn sync_write_is_a_single_broadcast() {
        let (mut bus, transport) = scripted_bus();
        bus.sync_write_i16(Register::GoalVelocity, &[(7, 100), (8, -100)])
            .unwrap();
        let written = transport.written();
        assert_eq!(written[2], BROADCAST_ID);
        assert_eq!(written[4], Instruction::SyncWrite as u8);
    }
}
