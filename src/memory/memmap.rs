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

//! This module handles the memory information, which stores global
//! information on the system memory by retrieving them from the boot
//! information.
//!
//! This data is meant to be used by the frame allocator.

use super::{PhysAddr, PAGE_SIZE};
use crate::{
	multiboot::{BootInfo, MmapEntry},
	sync::once::OnceInit,
};
use core::{cmp::min, iter};

extern "C" {
	/// Linker symbol, at the beginning of the kernel image.
	static kernel_start: u8;
	/// Linker symbol, right after the end of the kernel image.
	static kernel_end: u8;
}

/// Returns the physical address of the beginning of the kernel image.
pub fn kernel_begin() -> PhysAddr {
	PhysAddr(unsafe { &kernel_start as *const _ as usize })
}

/// Returns the physical address right after the end of the kernel image.
pub fn kernel_image_end() -> PhysAddr {
	PhysAddr(unsafe { &kernel_end as *const _ as usize })
}

/// Physical memory map information.
#[derive(Debug)]
pub struct PhysMapInfo {
	/// Size of the Multiboot memory map
	pub memory_maps_size: usize,
	/// Size of an entry in the Multiboot memory map
	pub memory_maps_entry_size: usize,
	/// Pointer to the Multiboot memory map
	pub memory_maps: *const MmapEntry,

	/// The size of the physical memory in number of pages.
	pub memory_size: usize,

	/// Physical address of the beginning of allocatable memory, page aligned.
	///
	/// Everything below (kernel image, boot information, modules) is off limits to the
	/// frame allocator.
	pub phys_main_begin: PhysAddr,
}

/// Physical memory map information.
pub static PHYS_MAP: OnceInit<PhysMapInfo> = unsafe { OnceInit::new() };

/// Returns an iterator over the valid entries of the Multiboot memory map.
pub fn mmap_iter() -> impl Iterator<Item = &'static MmapEntry> {
	let mut off = 0;
	iter::from_fn(move || {
		// 16 is the size of the tag's header
		let entries_size = PHYS_MAP.memory_maps_size.saturating_sub(16);
		if off + PHYS_MAP.memory_maps_entry_size > entries_size {
			return None;
		}
		// Safe because in range
		let entry = unsafe { &*PHYS_MAP.memory_maps.byte_add(off) };
		off += PHYS_MAP.memory_maps_entry_size;
		Some(entry)
	})
	.filter(|entry| entry.is_valid())
}

/// Prints the physical memory mapping.
#[cfg(debug_assertions)]
pub(crate) fn print_entries() {
	debug_assert!(!PHYS_MAP.memory_maps.is_null());
	crate::println!("--- Memory mapping ---");
	crate::println!("<begin> <end> <type>");
	for entry in mmap_iter() {
		let begin = entry.addr;
		let end = begin + entry.len;
		let type_ = entry.get_type_string();
		crate::println!("- {begin:08x} {end:08x} {type_}");
	}
}

/// Fills the memory mapping structure according to Multiboot's information.
pub(crate) fn init(boot_info: &BootInfo) {
	// The end of the memory occupied at boot: kernel image, Multiboot tags and modules
	let modules_end = boot_info
		.modules
		.iter()
		.flatten()
		.map(|module| module.end)
		.max()
		.unwrap_or_default();
	let tags_end = boot_info.tags_begin + boot_info.tags_size;
	let phys_main_begin = [kernel_image_end(), tags_end, modules_end]
		.into_iter()
		.max()
		.unwrap()
		.align_to(PAGE_SIZE);
	// The size of the physical memory in pages
	let memory_size = min(
		(1024 + boot_info.mem_upper as usize) / 4,
		usize::MAX / PAGE_SIZE,
	);
	let phys_map = PhysMapInfo {
		memory_maps_size: boot_info.memory_maps_size,
		memory_maps_entry_size: boot_info.memory_maps_entry_size,
		memory_maps: boot_info.memory_maps,

		memory_size,

		phys_main_begin,
	};
	unsafe {
		OnceInit::init(&PHYS_MAP, phys_map);
	}
}
