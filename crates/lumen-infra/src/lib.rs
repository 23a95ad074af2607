// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! # Lumen Infra
//!
//! Concrete implementations of the device contracts defined in `lumen-core`.
//!
//! The only backend shipped here is the [`SoftwareDevice`], which keeps every
//! buffer in host memory and runs compute kernels on the calling thread. It is
//! what the headless runtime and the test suites render with.

#![warn(missing_docs)]

pub mod software;

pub use software::{DeviceStats, DrawRecord, SoftwareDevice};
