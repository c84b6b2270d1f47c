// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport connectors. The analytics core only ever sees the
//! [`Ingress`]/[`Egress`] traits and the envelope contract; the concrete
//! broker stays on this side of the boundary.

mod base;
pub mod kafka;
pub mod memory;

pub use base::*;
