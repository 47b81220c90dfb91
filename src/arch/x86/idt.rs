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

//! The IDT (Interrupt Descriptor Table) is a table under the x86 architecture
//! storing the list of interrupt handlers, allowing to catch and handle
//! interruptions.

use crate::arch::x86::{cli, is_interrupt_enabled, pic, sti};
use core::{arch::global_asm, ffi::c_void, mem::size_of, ptr::addr_of};

/// The number of entries into the IDT.
pub const ENTRIES_COUNT: usize = 0x30;

/// Interruption stack frame, with saved registers state.
///
/// The layout matches the frame pushed by the interrupt service stubs: data segments,
/// general purpose registers (in `pusha` order), interrupt metadata, then the frame
/// pushed by the CPU itself. The last two fields are present only when the interrupted
/// context was running in ring 3.
#[repr(C)]
#[allow(missing_docs)]
#[derive(Clone, Debug, Default)]
pub struct IntFrame {
	pub gs: u32,
	pub fs: u32,
	pub es: u32,
	pub ds: u32,

	pub edi: u32,
	pub esi: u32,
	pub ebp: u32,
	pub esp: u32,
	pub ebx: u32,
	pub edx: u32,
	pub ecx: u32,
	pub eax: u32,

	/// Interruption number.
	pub int: u32,
	/// Error code, if any.
	pub code: u32,

	pub eip: u32,
	pub cs: u32,
	pub eflags: u32,
	pub useresp: u32,
	pub ss: u32,
}

/// An IDT header.
#[repr(C, packed)]
struct InterruptDescriptorTable {
	/// The size of the IDT in bytes, minus 1.
	size: u16,
	/// The address to the beginning of the IDT.
	offset: u32,
}

/// An IDT entry.
#[repr(C)]
#[derive(Clone, Copy)]
struct InterruptDescriptor {
	/// Bits 0..16 of the address to the handler for the interrupt.
	offset0: u16,
	/// The code segment selector to execute the interrupt.
	selector: u16,
	/// Must be set to zero.
	zero: u8,
	/// Interrupt handler flags.
	flags: u8,
	/// Bits 16..32 of the address to the handler for the interrupt.
	offset1: u16,
}

impl InterruptDescriptor {
	/// Returns a placeholder entry.
	const fn placeholder() -> Self {
		Self {
			offset0: 0,
			selector: 0,
			zero: 0,
			flags: 0,
			offset1: 0,
		}
	}

	/// Creates an IDT entry.
	///
	/// Arguments:
	/// - `address` is the address of the handler.
	/// - `selector` is the segment selector to be used to handle the interrupt.
	/// - `flags` is the set of flags for the entry (see Intel documentation).
	fn new(address: *const c_void, selector: u16, flags: u8) -> Self {
		Self {
			offset0: (address as usize & 0xffff) as u16,
			selector,
			zero: 0,
			flags,
			offset1: ((address as usize >> 16) & 0xffff) as u16,
		}
	}
}

// Interrupt service stubs. Vectors which do not push an error code get a dummy one, so
// every handler sees the same frame layout.
global_asm!(
	r#"
.macro STUB_NOCODE id
.global isr\id
isr\id:
	push 0
	push \id
	jmp int_common
.endm

.macro STUB_CODE id
.global isr\id
isr\id:
	push \id
	jmp int_common
.endm

STUB_NOCODE 0
STUB_NOCODE 1
STUB_NOCODE 2
STUB_NOCODE 3
STUB_NOCODE 4
STUB_NOCODE 5
STUB_NOCODE 6
STUB_NOCODE 7
STUB_CODE 8
STUB_NOCODE 9
STUB_CODE 10
STUB_CODE 11
STUB_CODE 12
STUB_CODE 13
STUB_CODE 14
STUB_NOCODE 15
STUB_NOCODE 16
STUB_CODE 17
STUB_NOCODE 18
STUB_NOCODE 19
STUB_NOCODE 20
STUB_CODE 21
STUB_NOCODE 22
STUB_NOCODE 23
STUB_NOCODE 24
STUB_NOCODE 25
STUB_NOCODE 26
STUB_NOCODE 27
STUB_NOCODE 28
STUB_NOCODE 29
STUB_CODE 30
STUB_NOCODE 31
STUB_NOCODE 32
STUB_NOCODE 33
STUB_NOCODE 34
STUB_NOCODE 35
STUB_NOCODE 36
STUB_NOCODE 37
STUB_NOCODE 38
STUB_NOCODE 39
STUB_NOCODE 40
STUB_NOCODE 41
STUB_NOCODE 42
STUB_NOCODE 43
STUB_NOCODE 44
STUB_NOCODE 45
STUB_NOCODE 46
STUB_NOCODE 47

int_common:
	pusha
	push ds
	push es
	push fs
	push gs

	# Load kernel data segments
	mov ax, 0x10
	mov ds, ax
	mov es, ax

	push esp
	call interrupt_handler
	add esp, 4

.global int_return
int_return:
	pop gs
	pop fs
	pop es
	pop ds
	popa
	add esp, 8
	iret
"#
);

extern "C" {
	fn isr0();
	fn isr1();
	fn isr2();
	fn isr3();
	fn isr4();
	fn isr5();
	fn isr6();
	fn isr7();
	fn isr8();
	fn isr9();
	fn isr10();
	fn isr11();
	fn isr12();
	fn isr13();
	fn isr14();
	fn isr15();
	fn isr16();
	fn isr17();
	fn isr18();
	fn isr19();
	fn isr20();
	fn isr21();
	fn isr22();
	fn isr23();
	fn isr24();
	fn isr25();
	fn isr26();
	fn isr27();
	fn isr28();
	fn isr29();
	fn isr30();
	fn isr31();
	fn isr32();
	fn isr33();
	fn isr34();
	fn isr35();
	fn isr36();
	fn isr37();
	fn isr38();
	fn isr39();
	fn isr40();
	fn isr41();
	fn isr42();
	fn isr43();
	fn isr44();
	fn isr45();
	fn isr46();
	fn isr47();
}

/// The list of IDT entries.
static mut IDT_ENTRIES: [InterruptDescriptor; ENTRIES_COUNT] =
	[InterruptDescriptor::placeholder(); ENTRIES_COUNT];

/// Executes the given function `f` with maskable interruptions disabled.
///
/// This function saves the state of the interrupt flag and restores it before
/// returning.
pub fn wrap_disable_interrupts<T, F: FnOnce() -> T>(f: F) -> T {
	let int = is_interrupt_enabled();
	// Here is assumed that no interruption will change flags register. Which could cause
	// a race condition
	cli();
	let res = f();
	if int {
		sti();
	} else {
		cli();
	}
	res
}

/// Initializes the IDT.
///
/// This function must be called only once at kernel initialization.
///
/// When returning, maskable interrupts are disabled by default.
pub fn init() {
	cli();
	pic::init(0x20, 0x28);
	// Safe because the current function is called only once at boot
	unsafe {
		let handlers: [unsafe extern "C" fn(); ENTRIES_COUNT] = [
			isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11,
			isr12, isr13, isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22,
			isr23, isr24, isr25, isr26, isr27, isr28, isr29, isr30, isr31, isr32, isr33,
			isr34, isr35, isr36, isr37, isr38, isr39, isr40, isr41, isr42, isr43, isr44,
			isr45, isr46, isr47,
		];
		let entries = &mut *core::ptr::addr_of_mut!(IDT_ENTRIES);
		for (entry, handler) in entries.iter_mut().zip(handlers) {
			*entry = InterruptDescriptor::new(handler as _, 0x8, 0x8e);
		}
		// Load
		let idt = InterruptDescriptorTable {
			size: (size_of::<InterruptDescriptor>() * ENTRIES_COUNT - 1) as u16,
			offset: addr_of!(IDT_ENTRIES) as _,
		};
		core::arch::asm!("lidt [{}]", in(reg) &idt);
	}
}
