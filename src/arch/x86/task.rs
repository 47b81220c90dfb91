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

//! Context switching utilities.
//!
//! A task's saved context is an [`IntFrame`] at the top of its kernel stack, so that
//! resuming a task is always the same operation: restore segments and general purpose
//! registers, then `iret`. [`create_default_frame`] crafts such a frame for a task that
//! has never run, making the first resume indistinguishable from a return from
//! interruption.

use crate::{
	arch::x86::{idt::IntFrame, KERNEL_CS, KERNEL_DS, USER_CS, USER_DS},
	errno,
	errno::EResult,
	process::KERNEL_STACK_SIZE,
};
use core::{arch::global_asm, ffi::c_void, mem::size_of, ptr};

/// Poison pattern for fresh stacks.
const STACK_POISON: u8 = 0xcd;
/// Marker word placed at the very top of a fresh stack, for debugging purposes.
const STACK_MARKER: usize = 0xdeadbeef;

/// Builds the initial saved-register frame of a task, so that the first resume returns
/// into its entry point. The function returns the stack pointer to resume from.
///
/// Arguments:
/// - `stack` is the base of the task's kernel stack.
/// - `ustack` is the base of the task's userspace stack, for user tasks.
/// - `ep` is the address of the entry point of the task.
/// - `arg` is the argument passed to the entry point.
/// - `leave` is the routine a task returning from its entry point falls into, placed as
///   return address on the stack the entry point runs on.
pub fn create_default_frame(
	stack: *mut u8,
	ustack: Option<*mut u8>,
	ep: usize,
	arg: *mut c_void,
	leave: unsafe extern "C" fn() -> !,
) -> EResult<*mut usize> {
	let user = ustack.is_some();
	let (cs, ds): (u32, u32) = if user {
		(USER_CS as _, USER_DS as _)
	} else {
		(KERNEL_CS as _, KERNEL_DS as _)
	};
	if stack.is_null() {
		return Err(errno::EINVAL);
	}
	unsafe {
		ptr::write_bytes(stack, STACK_POISON, KERNEL_STACK_SIZE);
		if let Some(ustack) = ustack {
			ptr::write_bytes(ustack, STACK_POISON, KERNEL_STACK_SIZE);
		}
		// The stack the entry point will execute on. Keep the top 16-byte aligned
		let base = ustack.unwrap_or(stack);
		let mut sp = base.add(KERNEL_STACK_SIZE - 16) as *mut usize;
		*sp = STACK_MARKER;
		sp = sp.sub(1);
		*sp = arg as usize;
		sp = sp.sub(1);
		*sp = leave as usize;

		// The initial register state lives on the kernel stack. It must look like the
		// frame of a task which was interrupted previously. Kernel tasks omit the two
		// user-mode words popped by `iret` only on privilege change
		let state_size = if user {
			size_of::<IntFrame>()
		} else {
			size_of::<IntFrame>() - 2 * size_of::<u32>()
		};
		let frame_top = if user {
			stack.add(KERNEL_STACK_SIZE - 16) as *mut usize
		} else {
			sp
		};
		let frame = (frame_top as usize - state_size) as *mut IntFrame;
		ptr::write_bytes(frame as *mut u8, 0, state_size);
		(*frame).esp = (frame as usize + state_size) as u32;
		(*frame).int = 0xb16b00b5;
		(*frame).code = 0xc03db4b3;
		(*frame).eip = ep as u32;
		(*frame).cs = cs;
		(*frame).ds = ds;
		(*frame).es = ds;
		(*frame).eflags = 0x1202;
		if user {
			(*frame).ss = ds;
			(*frame).useresp = sp as u32;
		}
		Ok(frame as *mut usize)
	}
}

extern "C" {
	/// Saves the current context on the stack, stores the stack pointer into
	/// `*old_sp_slot` and resumes the task designated by the scheduler.
	///
	/// The function returns when the suspended context is scheduled again.
	///
	/// # Safety
	///
	/// Must be called with maskable interrupts disabled. `old_sp_slot` must point to the
	/// previous task's saved stack pointer slot.
	pub fn switch_context(old_sp_slot: *mut *mut usize);
}

// The pseudo interrupt frame built here lets the task be resumed through the common
// `int_return` path like any interrupted task. `sched_current_context` returns a pointer
// to the new task's {stack pointer, page map} pair; a zero page map means the address
// space is unchanged.
global_asm!(
	r#"
.global switch_context
.type switch_context, @function

switch_context:
	mov eax, [esp + 4]
	pushfd
	push 0x8
	push offset switch_rollback
	push 0xc0edbabe
	push 0
	pusha
	push ds
	push es
	push fs
	push gs

	mov [eax], esp
	call sched_current_context
	mov esp, [eax]
	mov ecx, [eax + 4]
	jecxz 1f
	mov cr3, ecx
1:
	call finish_task_switch
	jmp int_return

switch_rollback:
	ret
"#
);
