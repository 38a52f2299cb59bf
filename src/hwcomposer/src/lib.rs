// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The hardware composer service: one session per process, owning the shared buffer manager and
//! the per-display composition pipelines.

mod logger;
mod session;

pub use crate::logger::init_logger;
pub use crate::session::DisplayId;
pub use crate::session::HwcSession;
pub use crate::session::PresentResult;
