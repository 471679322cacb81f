//! Serial board controller: one controller per peripheral LCD board,
//! addressed by a 1-based id. Frames are byte-stuffed and CRC-protected
//! (see `codec`); commands are acknowledged with bounded retry and
//! per-attempt timeout.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use chrono::{Datelike, Local, Timelike};
use serialport::SerialPort;
use tracing::warn;

use crate::codec::{crc16, decode_serial_frame, encode_serial_frame, DLE, ETX, STX};
use crate::error::{NvrError, Result};

pub const CMD_LCD_ON: u8 = 0x01;
pub const CMD_LCD_OFF: u8 = 0x02;
pub const CMD_SYNC_TIME: u8 = 0x03;

const ACK: u8 = 0xAA;
const NACK: u8 = 0x55;

/// Controls one board over a dedicated serial handle at 115200 8N1, no
/// flow control. `id` is 1-based; the destination bitmask sent in every
/// frame is `1 << (id - 1)`.
pub struct BoardController {
    id: u8,
    port: Box<dyn SerialPort>,
}

impl BoardController {
    pub fn open(device: &str, id: u8) -> Result<Self> {
        let port = serialport::new(device, 115_200)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| NvrError::Serial(format!("cannot open {device}: {e}")))?;
        Ok(BoardController { id, port })
    }

    fn dst_mask(&self) -> u8 {
        1 << (self.id - 1)
    }

    /// Encode a command frame: `[dst_mask, cmd, extra...]` followed by its
    /// big-endian CRC-16, then `DLE STX <stuffed> DLE ETX`.
    fn encode_command(&self, cmd: u8, extra: &[u8]) -> Vec<u8> {
        let mut payload = vec![self.dst_mask(), cmd];
        payload.extend_from_slice(extra);
        let crc = crc16(&payload);
        payload.push((crc >> 8) as u8);
        payload.push(crc as u8);
        encode_serial_frame(&payload)
    }

    fn send_frame(&mut self, cmd: u8, extra: &[u8]) -> Result<()> {
        let frame = self.encode_command(cmd, extra);
        self.port
            .write_all(&frame)
            .map_err(|e| NvrError::Serial(format!("board {}: write failed: {e}", self.id)))
    }

    pub fn send_lcd_on(&mut self) -> Result<()> {
        self.send_frame(CMD_LCD_ON, &[])
    }

    pub fn send_lcd_off(&mut self) -> Result<()> {
        self.send_frame(CMD_LCD_OFF, &[])
    }

    /// Build the `[yy, mm, dd, hh, min, ss, is_pm]` payload for the
    /// server's local wall clock and send it without awaiting an ack.
    pub fn send_time_sync(&mut self) -> Result<()> {
        let now = Local::now();
        let yy = (now.year() % 100) as u8;
        let extra = time_sync_payload(yy, now.month() as u8, now.day() as u8, now.hour() as u8, now.minute() as u8, now.second() as u8);
        self.send_frame(CMD_SYNC_TIME, &extra)
    }

    /// Transmit `cmd` up to `retries` times, running the `{WAIT_DLE,
    /// WAIT_STX, IN_FRAME, WAIT_ETX}` receive state machine after each
    /// attempt. Succeeds on a valid ACK; a NACK or timeout consumes the
    /// attempt and moves to the next retry after a short backoff.
    pub fn send_with_ack(&mut self, cmd: u8, retries: u32, timeout_ms: u64) -> Result<()> {
        let frame = self.encode_command(cmd, &[]);
        for attempt in 0..retries {
            self.port
                .clear(serialport::ClearBuffer::Input)
                .map_err(|e| NvrError::Serial(format!("board {}: flush failed: {e}", self.id)))?;
            self.port
                .write_all(&frame)
                .map_err(|e| NvrError::Serial(format!("board {}: write failed: {e}", self.id)))?;

            match self.await_ack(timeout_ms) {
                AckOutcome::Ack => return Ok(()),
                AckOutcome::Nack | AckOutcome::Timeout => {
                    warn!(board = self.id, attempt, "no ACK received, retrying");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
        Err(NvrError::Serial(format!("board {}: failed to get ACK after {retries} attempts", self.id)))
    }

    pub fn send_lcd_on_with_ack(&mut self, retries: u32, timeout_ms: u64) -> Result<()> {
        self.send_with_ack(CMD_LCD_ON, retries, timeout_ms)
    }

    pub fn send_lcd_off_with_ack(&mut self, retries: u32, timeout_ms: u64) -> Result<()> {
        self.send_with_ack(CMD_LCD_OFF, retries, timeout_ms)
    }

    /// Drive `{WAIT_DLE, WAIT_STX, IN_FRAME, WAIT_ETX}` over the raw byte
    /// stream, collecting the still-stuffed frame bytes (including the
    /// `DLE STX`/`DLE ETX` delimiters) and handing the complete frame to
    /// [`decode_serial_frame`] for unstuffing, so a `DLE DLE` pair inside
    /// the frame unescapes to one `0x10` payload byte instead of being
    /// mistaken for the closing delimiter.
    fn await_ack(&mut self, timeout_ms: u64) -> AckOutcome {
        #[derive(PartialEq)]
        enum State { WaitDle, WaitStx, InFrame, WaitEtx }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut state = State::WaitDle;
        let mut raw_frame: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(1) => {}
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(_) => return AckOutcome::Timeout,
            }
            let rx = byte[0];
            state = match state {
                State::WaitDle => if rx == DLE { State::WaitStx } else { State::WaitDle },
                State::WaitStx => {
                    if rx == STX {
                        raw_frame.clear();
                        raw_frame.push(DLE);
                        raw_frame.push(STX);
                        State::InFrame
                    } else if rx != DLE {
                        State::WaitDle
                    } else {
                        State::WaitStx
                    }
                }
                State::InFrame => {
                    if rx == DLE {
                        // Ambiguous until the next byte: a doubled `DLE`
                        // (stuffed literal) or the start of `DLE ETX`.
                        raw_frame.push(rx);
                        State::WaitEtx
                    } else {
                        raw_frame.push(rx);
                        State::InFrame
                    }
                }
                State::WaitEtx => {
                    if rx == ETX {
                        raw_frame.push(rx);
                        let outcome = decode_serial_frame(&raw_frame)
                            .ok()
                            .filter(|payload| payload.len() == 3)
                            .and_then(|payload| {
                                let resp = payload[0];
                                let recv_crc = ((payload[1] as u16) << 8) | payload[2] as u16;
                                (recv_crc == crc16(&[resp])).then_some(resp)
                            });
                        match outcome {
                            Some(ACK) => return AckOutcome::Ack,
                            Some(NACK) => return AckOutcome::Nack,
                            _ => {}
                        }
                        raw_frame.clear();
                        State::WaitDle
                    } else if rx == DLE {
                        // Stuffed `DLE DLE`: unescape back to one literal
                        // `0x10` payload byte and keep reading the frame.
                        raw_frame.push(rx);
                        State::InFrame
                    } else {
                        raw_frame.clear();
                        State::WaitDle
                    }
                }
            };
        }
        AckOutcome::Timeout
    }
}

enum AckOutcome {
    Ack,
    Nack,
    Timeout,
}

/// `hh` in 1..12, `is_pm` 0 or 1; midnight maps to `(12, 0)`, noon to
/// `(12, 1)`.
fn time_sync_payload(yy: u8, mm: u8, dd: u8, hour24: u8, min: u8, sec: u8) -> Vec<u8> {
    let (hh, is_pm) = to_12_hour(hour24);
    vec![yy, mm, dd, hh, min, sec, is_pm]
}

fn to_12_hour(hour24: u8) -> (u8, u8) {
    let is_pm = if hour24 >= 12 { 1u8 } else { 0u8 };
    let mut hh = hour24 % 12;
    if hh == 0 {
        hh = 12;
    }
    (hh, is_pm)
}
