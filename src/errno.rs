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

//! This module stores the errno utilities.

use core::alloc::AllocError;

/// Type representing an Unix errno.
pub type Errno = i32;

/// A result with an [`Errno`] as error type.
pub type EResult<T> = Result<T, Errno>;
/// A result for memory allocation paths.
pub type AllocResult<T> = Result<T, AllocError>;

/// Operation not permitted.
pub const EPERM: Errno = 1;
/// I/O error.
pub const EIO: Errno = 5;
/// Resource unavailable, try again.
pub const EAGAIN: Errno = 11;
/// Not enough space.
pub const ENOMEM: Errno = 12;
/// Device or resource busy.
pub const EBUSY: Errno = 16;
/// Invalid argument.
pub const EINVAL: Errno = 22;
/// Functionality not supported.
pub const ENOSYS: Errno = 38;
/// Operation canceled.
pub const ECANCELED: Errno = 125;
