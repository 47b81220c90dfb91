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

//! Kernel entry point and bootstrap paging.
//!
//! The bootloader drops us in protected mode with paging disabled. This module sets up a
//! provisional identity mapping of the first 4 MiB, installs the page directory's
//! self-reference and jumps into [`kernel_main`](crate::kernel_main).
//!
//! Bootstrap page table entries are marked with [`FLAG_SELF`], so that
//! [`vmem::init`](crate::memory::vmem::init) can later locate and remove them.

use crate::memory::vmem::x86::{Entry, FLAG_PRESENT, FLAG_SELF, FLAG_WRITE, Table};
use core::{arch::global_asm, sync::atomic::AtomicU32};

/// Boot stack size
#[cfg(debug_assertions)]
pub const BOOT_STACK_SIZE: usize = 262144; // rustc in debug mode is greedy
/// Boot stack size
#[cfg(not(debug_assertions))]
pub const BOOT_STACK_SIZE: usize = 32768;

/// The page table identity mapping the first 4 MiB of physical memory.
///
/// The static is marked as **mutable** because the CPU will set the dirty flag.
#[no_mangle]
#[link_section = ".boot.data"]
static mut BOOT_PGT: Table = const {
	let mut table = Table::new();
	// TODO use for loop when stabilized
	let mut i = 0;
	while i < 1024 {
		let addr = (i as Entry) << 12;
		table.0[i] = AtomicU32::new(addr | FLAG_SELF | FLAG_WRITE | FLAG_PRESENT);
		i += 1;
	}
	table
};

/// The bootstrap page directory.
///
/// Entry `0` (pointing to [`BOOT_PGT`]) and the self-reference in the last entry are
/// installed at runtime in assembly, since they require the tables' physical addresses.
#[no_mangle]
#[link_section = ".boot.data"]
static mut BOOT_MAP: Table = Table::new();

// Common initialization code
global_asm!(
	r#"
.code32
.section .boot.text, "ax"

# Multiboot2 kernel header
.align 8
header:
	# Multiboot2 magic
	.long 0xe85250d6
	# Architecture (x86)
	.long 0
	# Header length
	.long (header_end - header)
	.long -(0xe85250d6 + (header_end - header))

# The entry tag, setting the entry point of the kernel.
.align 8
entry_address_tag:
	.short 3
	.short 0
	.long (entry_address_tag_end - entry_address_tag)
	.long multiboot_entry
entry_address_tag_end:

# End tag
.align 8
	.short 0
	.short 0
	.long 8
header_end:

.section .boot.stack, "aw"

.align 8

.global boot_stack
boot_stack:
.size boot_stack, {BOOT_STACK_SIZE}
.skip {BOOT_STACK_SIZE}
.global boot_stack_begin
boot_stack_begin:
"#,
	BOOT_STACK_SIZE = const(BOOT_STACK_SIZE)
);

global_asm!(
	r#"
.section .boot.text

.global multiboot_entry
.global _start
.hidden complete_flush
.type multiboot_entry, @function

_start:
multiboot_entry:
	mov esp, offset boot_stack_begin
	xor ebp, ebp
	push 0
	popfd

	# Stash multiboot info
	push ebx
	push eax

	# Reference the identity page table in the directory
	mov eax, offset {BOOT_PGT}
	or eax, 0x103 # PRESENT | WRITE | GLOBAL
	mov dword ptr [offset {BOOT_MAP}], eax

	# Install the directory's self-reference in its last entry
	mov eax, offset {BOOT_MAP}
	or eax, 0x203 # PRESENT | WRITE | SELF
	mov dword ptr [offset {BOOT_MAP} + 1023 * 4], eax

	# Set page directory
	mov eax, offset {BOOT_MAP}
	mov cr3, eax

	# Enable global pages
	mov eax, cr4
	or eax, 0x80
	mov cr4, eax

	# Enable paging and write protect
	mov eax, cr0
	or eax, 0x80010000
	mov cr0, eax

	# Fill the TSS descriptor's base address
	mov eax, offset tss
	mov word ptr [gdt_entries + 0x28 + 2], ax
	shr eax, 16
	mov byte ptr [gdt_entries + 0x28 + 4], al
	mov byte ptr [gdt_entries + 0x28 + 7], ah

	# Load GDT
	lgdt [gdt]
	push 8 # kernel code segment
	mov eax, offset complete_flush
	push eax
	retf
complete_flush:
	mov ax, 16 # kernel data segment
	mov ds, ax
	mov es, ax
	mov ss, ax

	mov ax, 0
	mov fs, ax
	mov gs, ax

	# Task register, for userspace re-entry into ring 0
	mov dword ptr [tss + 4], offset boot_stack_begin
	mov ax, 0x28
	ltr ax

	call kernel_main
	# cannot return
	ud2

.section .boot.data

.align 8
gdt_entries:
	.long 0, 0
	.long 0x0000ffff, 0x00cf9a00 # kernel code
	.long 0x0000ffff, 0x00cf9200 # kernel data
	.long 0x0000ffff, 0x00cffa00 # user code
	.long 0x0000ffff, 0x00cff200 # user data
	# TSS descriptor, base filled at runtime
	.word (tss_end - tss - 1)
	.word 0
	.byte 0
	.byte 0x89
	.byte 0
	.byte 0
gdt:
	.word gdt - gdt_entries - 1
	.long gdt_entries

.align 4
tss:
	.long 0          # link
	.long 0          # esp0, set at runtime
	.long 16         # ss0
	.skip 23 * 4
tss_end:
"#,
	BOOT_PGT = sym BOOT_PGT,
	BOOT_MAP = sym BOOT_MAP
);
