//! Scripted in-memory bootloader for tests.
//!
//! [`MockDevice`] decodes host frames as they are written and queues the
//! replies a ROM bootloader would send. State is shared between every port
//! opened from the same device so tests can inspect it afterwards.

use {
    crate::{
        error::{ConnectionError, Result},
        port::{Port, PortOpener, SerialConfig},
        protocol::{ACK, NACK, SYNC, decode_command, encode_packet},
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        sync::{Arc, Mutex, MutexGuard},
        time::Duration,
    },
};

const START_DOWNLOAD: u8 = 0x21;
const GET_LAST_STATUS: u8 = 0x23;
const GET_VERSION_INFO: u8 = 0x2F;
const SRAM_CODE: [u8; 4] = [0, 0, 0, 4];

/// What the device does when the break signal is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakReply {
    Ack,
    Nack,
    Silent,
}

#[derive(Debug)]
pub(crate) struct DeviceState {
    to_host: VecDeque<u8>,
    from_host: Vec<u8>,
    pub commands: Vec<(u8, Vec<u8>)>,
    pub host_acks: usize,
    pub breaks: Vec<bool>,
    pub opens: usize,
    pub closes: usize,
    pub break_reply: BreakReply,
    pub nack_opcodes: Vec<u8>,
    pub version: Option<Vec<u8>>,
    pub status: u8,
    pub stall_status: bool,
    pub fail_open: bool,
    sram: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            to_host: VecDeque::new(),
            from_host: Vec::new(),
            commands: Vec::new(),
            host_acks: 0,
            breaks: Vec::new(),
            opens: 0,
            closes: 0,
            break_reply: BreakReply::Ack,
            nack_opcodes: Vec::new(),
            version: Some(vec![0x0A, 0x00, 0x07, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]),
            status: 0x40,
            stall_status: false,
            fail_open: false,
            sram: false,
        }
    }
}

fn ack_frame(control: u8) -> [u8; 5] {
    [0x00, 0x04, control, 0x00, control]
}

fn response_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = encode_packet(payload).unwrap_or_default();
    frame.remove(0);
    frame
}

impl DeviceState {
    fn queue(&mut self, bytes: &[u8]) {
        self.to_host.extend(bytes.iter().copied());
    }

    fn queue_ack(&mut self, opcode: u8) {
        let control = if self.nack_opcodes.contains(&opcode) {
            NACK
        } else {
            ACK
        };
        self.queue(&ack_frame(control));
    }

    fn handle(&mut self, opcode: u8, args: Vec<u8>) {
        match opcode {
            GET_LAST_STATUS if self.stall_status => {},
            GET_LAST_STATUS => {
                let width = if self.sram { 4 } else { 1 };
                let mut payload = vec![0u8; width];
                payload[0] = self.status;
                self.queue(&response_frame(&payload));
            },
            GET_VERSION_INFO => {
                self.queue_ack(opcode);
                if let Some(version) = self.version.clone() {
                    self.queue(&response_frame(&version));
                }
            },
            START_DOWNLOAD => {
                self.sram = args.get(4..8) == Some(&SRAM_CODE[..]);
                self.queue_ack(opcode);
            },
            _ => self.queue_ack(opcode),
        }
        self.commands.push((opcode, args));
    }

    fn consume_host_bytes(&mut self) {
        loop {
            match self.from_host.first() {
                None => return,
                Some(&ACK) => {
                    self.host_acks += 1;
                    self.from_host.remove(0);
                },
                Some(&SYNC) => {
                    if self.from_host.len() < 4 {
                        return;
                    }
                    let declared = usize::from(u16::from_be_bytes([self.from_host[1], self.from_host[2]]));
                    let total = 4 + declared.saturating_sub(2);
                    if self.from_host.len() < total {
                        return;
                    }
                    let frame: Vec<u8> = self.from_host.drain(..total).collect();
                    if let Ok((opcode, args)) = decode_command(&frame) {
                        self.handle(opcode, args);
                    }
                },
                Some(_) => {
                    self.from_host.remove(0);
                },
            }
        }
    }

    /// Opcodes in the order they were received.
    pub fn opcodes(&self) -> Vec<u8> {
        self.commands.iter().map(|(op, _)| *op).collect()
    }

    /// Number of commands with `opcode`.
    pub fn count(&self, opcode: u8) -> usize {
        self.commands.iter().filter(|(op, _)| *op == opcode).count()
    }

    /// Arguments of every command with `opcode`.
    pub fn args_of(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.commands
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

/// Shared handle to a simulated bootloader.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, DeviceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn with_version(self, version: &[u8]) -> Self {
        self.state().version = Some(version.to_vec());
        self
    }

    pub(crate) fn nack(self, opcode: u8) -> Self {
        self.state().nack_opcodes.push(opcode);
        self
    }

    pub(crate) fn stall_status(self) -> Self {
        self.state().stall_status = true;
        self
    }

    pub(crate) fn break_reply(self, reply: BreakReply) -> Self {
        self.state().break_reply = reply;
        self
    }

    pub(crate) fn opener(&self) -> MockOpener {
        MockOpener {
            device: self.clone(),
        }
    }
}

/// Opens [`MockPort`]s onto a [`MockDevice`].
#[derive(Debug, Clone)]
pub(crate) struct MockOpener {
    device: MockDevice,
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&mut self, config: &SerialConfig) -> Result<MockPort> {
        let mut state = self.device.state();
        if state.fail_open {
            return Err(ConnectionError::PortUnavailable {
                port: config.port_name.clone(),
            }
            .into());
        }
        state.opens += 1;
        drop(state);
        Ok(MockPort {
            device: self.device.clone(),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
            open: true,
        })
    }
}

/// One open handle onto a [`MockDevice`].
#[derive(Debug)]
pub(crate) struct MockPort {
    device: MockDevice,
    name: String,
    timeout: Duration,
    baud_rate: u32,
    open: bool,
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.device.state().to_host.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_break(&mut self, level: bool) -> Result<()> {
        let mut state = self.device.state();
        state.breaks.push(level);
        if level {
            match state.break_reply {
                BreakReply::Ack => state.queue(&ack_frame(ACK)),
                BreakReply::Nack => state.queue(&ack_frame(NACK)),
                BreakReply::Silent => {},
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.device.state().closes += 1;
        }
        Ok(())
    }
}

impl Drop for MockPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if state.to_host.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(state.to_host.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        state.from_host.extend_from_slice(buf);
        state.consume_host_bytes();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_command;

    #[test]
    fn test_mock_answers_command_and_status() {
        let device = MockDevice::new();
        let mut port = device.opener().open(&SerialConfig::new("mock", 115_200)).unwrap();
        port.write_all_bytes(&encode_command(0x20, &[]).unwrap()).unwrap();

        let mut ack = [0u8; 5];
        port.read_exact(&mut ack).unwrap();
        assert_eq!(ack, [0x00, 0x04, ACK, 0x00, ACK]);

        port.write_all_bytes(&encode_command(GET_LAST_STATUS, &[]).unwrap()).unwrap();
        let mut status = [0u8; 4];
        port.read_exact(&mut status).unwrap();
        assert_eq!(status, [0x00, 0x03, 0x40, 0x40]);

        assert_eq!(device.state().opcodes(), vec![0x20, GET_LAST_STATUS]);
    }

    #[test]
    fn test_mock_counts_close_once() {
        let device = MockDevice::new();
        let mut port = device.opener().open(&SerialConfig::default()).unwrap();
        port.close().unwrap();
        drop(port);
        let state = device.state();
        assert_eq!(state.opens, 1);
        assert_eq!(state.closes, 1);
    }
}
