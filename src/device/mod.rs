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

//! Devices management.
//!
//! The kernel core only drives the serial port, as a sink for its logs. Every other
//! device is out of its hands.

pub mod serial;
