/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of eduOS.
 *
 * eduOS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * eduOS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * eduOS. If not, see <https://www.gnu.org/licenses/>.
 */

//! Serial port communications.
//!
//! Only the write side of COM1 is implemented, which is all the logger needs.

use crate::arch::x86::io::{inb, outb};
use core::sync::atomic::{AtomicBool, Ordering::Relaxed};

/// The offset of COM1 registers.
const COM1: u16 = 0x3f8;

/// When DLAB = 0: Data register
const DATA_REG_OFF: u16 = 0;
/// When DLAB = 0: Interrupt Enable Register
const INTERRUPT_REG_OFF: u16 = 1;
/// When DLAB = 1: least significant byte of the divisor value
const DIVISOR_LO_REG_OFF: u16 = 0;
/// When DLAB = 1: most significant byte of the divisor value
const DIVISOR_HI_REG_OFF: u16 = 1;
/// Interrupt Identification and FIFO control registers
const II_FIFO_REG_OFF: u16 = 2;
/// Line Control Register
const LINE_CTRL_REG_OFF: u16 = 3;
/// Modem Control Register
const MODEM_CTRL_REG_OFF: u16 = 4;
/// Line Status Register
const LINE_STATUS_REG_OFF: u16 = 5;

/// The offset of the DLAB bit in the line control register.
const DLAB: u8 = 1 << 7;
/// Bit of the Line Status Register telling whether the transmission buffer is empty.
const LINE_STATUS_THRE: u8 = 1 << 5;

/// The UART's frequency.
const UART_FREQUENCY: u32 = 115200;

/// Tells whether the port has been probed successfully.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Initializes COM1 for output at 38400 bauds, 8 bits, no parity, one stop bit.
///
/// If the port does not respond to probing, it stays unused and writes are dropped.
pub fn init() {
	unsafe {
		outb(COM1 + INTERRUPT_REG_OFF, 0x00);
		// Set the baud rate
		let div = (UART_FREQUENCY / 38400) as u16;
		let line_ctrl = inb(COM1 + LINE_CTRL_REG_OFF);
		outb(COM1 + LINE_CTRL_REG_OFF, line_ctrl | DLAB);
		outb(COM1 + DIVISOR_LO_REG_OFF, (div & 0xff) as _);
		outb(COM1 + DIVISOR_HI_REG_OFF, ((div >> 8) & 0xff) as _);
		// 8 bits, no parity, one stop bit
		outb(COM1 + LINE_CTRL_REG_OFF, 0x03);
		outb(COM1 + II_FIFO_REG_OFF, 0xc7);
		outb(COM1 + MODEM_CTRL_REG_OFF, 0x0b);
		// Loopback probe
		outb(COM1 + MODEM_CTRL_REG_OFF, 0x1e);
		outb(COM1 + DATA_REG_OFF, 0xae);
		if inb(COM1 + DATA_REG_OFF) != 0xae {
			return;
		}
		outb(COM1 + MODEM_CTRL_REG_OFF, 0x0f);
	}
	ACTIVE.store(true, Relaxed);
}

/// Writes the given bytes on the port.
///
/// If the port is not active, the bytes are dropped.
pub fn write(bytes: &[u8]) {
	if !ACTIVE.load(Relaxed) {
		return;
	}
	for b in bytes {
		unsafe {
			while inb(COM1 + LINE_STATUS_REG_OFF) & LINE_STATUS_THRE == 0 {}
			outb(COM1 + DATA_REG_OFF, *b);
		}
	}
}
