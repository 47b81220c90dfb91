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

//! The Multiboot standard specifies an interface to load and boot the kernel
//! image. It provides essential information such as the memory mapping and the
//! list of boot modules.

use crate::{memory::PhysAddr, sync::once::OnceInit};
use core::{ffi::c_void, ptr::null, slice};

/// The magic number passed by a Multiboot2-compliant bootloader.
pub const BOOTLOADER_MAGIC: u32 = 0x36d76289;

/// Terminates the list of tags.
pub const TAG_TYPE_END: u32 = 0;
/// Command line tag.
pub const TAG_TYPE_CMDLINE: u32 = 1;
/// Bootloader name tag.
pub const TAG_TYPE_BOOT_LOADER_NAME: u32 = 2;
/// Boot module tag.
pub const TAG_TYPE_MODULE: u32 = 3;
/// Basic memory information tag.
pub const TAG_TYPE_BASIC_MEMINFO: u32 = 4;
/// Memory map tag.
pub const TAG_TYPE_MMAP: u32 = 6;

/// Memory map entry type: memory available for use.
pub const MEMORY_AVAILABLE: u32 = 1;
/// Memory map entry type: memory holding ACPI information.
pub const MEMORY_ACPI_RECLAIMABLE: u32 = 3;
/// Memory map entry type: memory reserved for hibernation.
pub const MEMORY_NVS: u32 = 4;
/// Memory map entry type: defective RAM.
pub const MEMORY_BADRAM: u32 = 5;

/// The maximum number of boot modules taken into account.
pub const MAX_MODULES: usize = 8;

/// An entry of the physical memory map.
#[repr(C)]
pub struct MmapEntry {
	/// Base physical address of the region.
	pub addr: u64,
	/// Size of the region in bytes.
	pub len: u64,
	/// Type of the region.
	pub type_: u32,
	zero: u32,
}

impl MmapEntry {
	/// Tells if a Multiboot mmap entry is valid.
	pub fn is_valid(&self) -> bool {
		(self.addr + self.len) < (1_u64 << 32)
	}

	/// Returns the string describing the memory region according to its type.
	pub fn get_type_string(&self) -> &'static str {
		match self.type_ {
			MEMORY_AVAILABLE => "Available",
			MEMORY_ACPI_RECLAIMABLE => "ACPI",
			MEMORY_NVS => "Hibernate",
			MEMORY_BADRAM => "Bad RAM",
			_ => "Reserved",
		}
	}
}

#[repr(C)]
struct Tag {
	type_: u32,
	size: u32,
}

#[repr(C)]
struct TagString {
	type_: u32,
	size: u32,
	string: [u8; 0],
}

#[repr(C)]
struct TagModule {
	type_: u32,
	size: u32,
	mod_start: u32,
	mod_end: u32,
	cmdline: [u8; 0],
}

#[repr(C)]
struct TagBasicMeminfo {
	type_: u32,
	size: u32,
	mem_lower: u32,
	mem_upper: u32,
}

#[repr(C)]
struct TagMmap {
	type_: u32,
	size: u32,
	entry_size: u32,
	entry_version: u32,
	entries: [MmapEntry; 0],
}

impl Tag {
	/// Returns the pointer to the next Multiboot tag after the current tag.
	fn next(&self) -> *const Self {
		((self as *const _ as usize) + (((self.size + 7) & !7) as usize)) as *const _
	}
}

/// The physical extent of a boot module.
#[derive(Clone, Copy, Debug)]
pub struct Module {
	/// Physical address of the module's first byte.
	pub start: PhysAddr,
	/// Physical address right after the module's last byte.
	pub end: PhysAddr,
}

/// Kernel boot information provided by Multiboot, structured and filtered.
pub struct BootInfo {
	/// The command line used to boot the kernel.
	pub cmdline: Option<&'static [u8]>,
	/// The bootloader's name.
	pub loader_name: Option<&'static [u8]>,

	/// The lower memory size, in KiB.
	pub mem_lower: u32,
	/// The upper memory size, in KiB.
	pub mem_upper: u32,
	/// The size of physical memory mappings.
	pub memory_maps_size: usize,
	/// The size of a physical memory mapping entry.
	pub memory_maps_entry_size: usize,
	/// The list of physical memory mappings.
	pub memory_maps: *const MmapEntry,

	/// The boot modules' physical extents.
	pub modules: [Option<Module>; MAX_MODULES],

	/// Physical address of the Multiboot tags.
	pub tags_begin: PhysAddr,
	/// Size of the Multiboot tags, in bytes.
	pub tags_size: usize,
}

impl Default for BootInfo {
	fn default() -> Self {
		Self {
			cmdline: None,
			loader_name: None,
			mem_lower: 0,
			mem_upper: 0,
			memory_maps_size: 0,
			memory_maps_entry_size: 0,
			memory_maps: null(),
			modules: [None; MAX_MODULES],
			tags_begin: PhysAddr(0),
			tags_size: 0,
		}
	}
}

/// The field storing the information given to the kernel at boot time.
static BOOT_INFO: OnceInit<BootInfo> = unsafe { OnceInit::new() };

/// Returns boot information provided by Multiboot.
pub fn get_boot_info() -> &'static BootInfo {
	&BOOT_INFO
}

/// Reinterprets a tag with the given type.
unsafe fn reinterpret_tag<T>(tag: &Tag) -> &'static T {
	&*(tag as *const _ as *const T)
}

/// Returns the NUL-terminated string starting at `ptr`.
unsafe fn str_from_ptr(ptr: *const u8) -> &'static [u8] {
	let mut len = 0;
	while *ptr.add(len) != 0 {
		len += 1;
	}
	slice::from_raw_parts(ptr, len)
}

/// Reads the given `tag` and fills boot information structure accordingly.
unsafe fn handle_tag(boot_info: &mut BootInfo, tag: &Tag) {
	match tag.type_ {
		TAG_TYPE_CMDLINE => {
			let t: &TagString = reinterpret_tag(tag);
			boot_info.cmdline = Some(str_from_ptr(t.string.as_ptr()));
		}
		TAG_TYPE_BOOT_LOADER_NAME => {
			let t: &TagString = reinterpret_tag(tag);
			boot_info.loader_name = Some(str_from_ptr(t.string.as_ptr()));
		}
		TAG_TYPE_MODULE => {
			let t: &TagModule = reinterpret_tag(tag);
			let module = Module {
				start: PhysAddr(t.mod_start as _),
				end: PhysAddr(t.mod_end as _),
			};
			if let Some(slot) = boot_info.modules.iter_mut().find(|m| m.is_none()) {
				*slot = Some(module);
			}
		}
		TAG_TYPE_BASIC_MEMINFO => {
			let t: &TagBasicMeminfo = reinterpret_tag(tag);
			boot_info.mem_lower = t.mem_lower;
			boot_info.mem_upper = t.mem_upper;
		}
		TAG_TYPE_MMAP => {
			let t: &TagMmap = reinterpret_tag(tag);
			boot_info.memory_maps_size = t.size as usize;
			boot_info.memory_maps_entry_size = t.entry_size as usize;
			boot_info.memory_maps = t.entries.as_ptr();
		}
		_ => {}
	}
}

/// Reads the multiboot information.
///
/// If the magic number is invalid, the function makes the kernel panic.
///
/// # Safety
///
/// `ptr` must point to valid Multiboot2 tags. This function must be called only once, at
/// boot.
pub unsafe fn read(magic: u32, ptr: *const c_void) -> &'static BootInfo {
	if magic != BOOTLOADER_MAGIC {
		panic!("invalid multiboot magic number: {magic:#x}");
	}
	let mut boot_info = BootInfo::default();
	let mut tag = ptr.offset(8) as *const Tag;
	while (*tag).type_ != TAG_TYPE_END {
		handle_tag(&mut boot_info, &*tag);
		tag = (*tag).next();
	}
	tag = (*tag).next();
	boot_info.tags_begin = PhysAddr(ptr as usize);
	boot_info.tags_size = tag as usize - ptr as usize;
	OnceInit::init(&BOOT_INFO, boot_info)
}
