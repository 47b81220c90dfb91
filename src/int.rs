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

//! Interrupt handler register interface.

use crate::{
	arch::end_of_interrupt,
	arch::x86::idt,
	arch::x86::idt::IntFrame,
	errno,
	errno::EResult,
	sync::spin::IntSpin,
};

/// The list of interrupt error messages ordered by index of the corresponding
/// interrupt vector.
static ERROR_MESSAGES: &[&str] = &[
	"Divide-by-zero Error",
	"Debug",
	"Non-maskable Interrupt",
	"Breakpoint",
	"Overflow",
	"Bound Range Exceeded",
	"Invalid Opcode",
	"Device Not Available",
	"Double Fault",
	"Coprocessor Segment Overrun",
	"Invalid TSS",
	"Segment Not Present",
	"Stack-Segment Fault",
	"General Protection Fault",
	"Page Fault",
	"Unknown",
	"x87 Floating-Point Exception",
	"Alignment Check",
	"Machine Check",
	"SIMD Floating-Point Exception",
	"Virtualization Exception",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Unknown",
	"Security Exception",
	"Unknown",
];

/// The action to execute after the interrupt handler has returned.
pub enum CallbackResult {
	/// Resumes the interrupted context.
	Continue,
	/// Makes the kernel panic with a message corresponding to the interruption.
	Panic,
}

/// A callback to handle an interruption.
///
/// Arguments:
/// - `id` is the id of the interrupt.
/// - `code` is an optional code associated with the interrupt. If no code is given, the
///   value is `0`.
/// - `frame` is the saved state of the registers when the interruption was triggered.
/// - `ring` tells the ring at which the code was running.
///
/// The return value tells which action to perform next.
pub type Callback = fn(u32, u32, &mut IntFrame, u8) -> CallbackResult;

/// The handler, if any, installed for every interrupt vector.
///
/// A vector holds at most one handler at a time, which keeps dispatch allocation-free.
static CALLBACKS: [IntSpin<Option<Callback>>; idt::ENTRIES_COUNT] =
	[const { IntSpin::new(None) }; idt::ENTRIES_COUNT];

/// Installs the given callback for the interrupt vector `id`.
///
/// If a callback is already installed for this vector, the function returns `EBUSY`.
pub fn install_handler(id: u32, callback: Callback) -> EResult<()> {
	let Some(slot) = CALLBACKS.get(id as usize) else {
		return Err(errno::EINVAL);
	};
	let mut slot = slot.lock();
	if slot.is_some() {
		return Err(errno::EBUSY);
	}
	*slot = Some(callback);
	Ok(())
}

/// Removes the callback installed for the interrupt vector `id`, if any.
pub fn uninstall_handler(id: u32) {
	if let Some(slot) = CALLBACKS.get(id as usize) {
		*slot.lock() = None;
	}
}

/// Called whenever an interruption is triggered.
///
/// `frame` is the stack frame of the interruption, with registers state saved.
#[no_mangle]
extern "C" fn interrupt_handler(frame: &mut IntFrame) {
	let id = frame.int;
	let ring = (frame.cs & 0b11) as u8;
	let code = frame.code;
	// For hardware interrupts, acknowledge before dispatching: a callback may switch
	// context and not return here until much later
	if let Some(irq) = id.checked_sub(ERROR_MESSAGES.len() as u32) {
		end_of_interrupt(irq as _);
	}
	// Not holding the lock while the callback runs, as it may itself yield
	let callback = *CALLBACKS[id as usize].lock();
	match callback {
		Some(callback) => match callback(id, code, frame, ring) {
			CallbackResult::Continue => {}
			CallbackResult::Panic => {
				let error = ERROR_MESSAGES.get(id as usize).unwrap_or(&"Unknown");
				panic!("{error}, code: {code:x}");
			}
		},
		// An exception without a handler is fatal
		None if (id as usize) < ERROR_MESSAGES.len() => {
			let error = ERROR_MESSAGES.get(id as usize).unwrap_or(&"Unknown");
			panic!("{error}, code: {code:x}");
		}
		// A spurious hardware interrupt is ignored
		None => {}
	}
}
