// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use env_logger::Builder;
use env_logger::Env;
use log::debug;
use log::LevelFilter;

fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the process logger at `level` (0 off through 5 trace). `RUST_LOG` overrides the
/// level. Once a logger is installed, later calls only change the maximum level.
pub fn init_logger(level: u8) {
    let filter = level_filter(level);
    if Builder::new()
        .filter_level(filter)
        .parse_env(Env::default())
        .try_init()
        .is_err()
    {
        log::set_max_level(filter);
        debug!("logger already installed, max level now {}", filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(level_filter(0), LevelFilter::Off);
        assert_eq!(level_filter(3), LevelFilter::Info);
        assert_eq!(level_filter(5), LevelFilter::Trace);
        assert_eq!(level_filter(200), LevelFilter::Trace);
    }

    #[test]
    fn second_init_is_harmless() {
        init_logger(2);
        init_logger(4);
        assert_eq!(log::max_level(), LevelFilter::Debug);
    }
}
