// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Read-only access to system properties such as `vendor.display.disable_hdr`.

use std::collections::BTreeMap as Map;
use std::env;

/// A source of named string properties.
pub trait PropertyStore: Send + Sync {
    /// Returns the raw value of `name`, or `None` when it is not set.
    fn get(&self, name: &str) -> Option<String>;

    /// Returns true when `name` is set to "1" or "true" (case-insensitive).
    fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(v) => {
                let v = v.trim();
                v == "1" || v.eq_ignore_ascii_case("true")
            }
            None => false,
        }
    }

    fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    fn get_u32(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }
}

/// Maps `vendor.display.disable_hdr` to the environment variable `VENDOR_DISPLAY_DISABLE_HDR`.
#[derive(Default)]
pub struct EnvPropertyStore;

impl EnvPropertyStore {
    pub fn variable_name(property: &str) -> String {
        property
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl PropertyStore for EnvPropertyStore {
    fn get(&self, name: &str) -> Option<String> {
        env::var(Self::variable_name(name)).ok()
    }
}

/// An in-memory property store.
#[derive(Default, Clone)]
pub struct MapPropertyStore {
    values: Map<String, String>,
}

impl MapPropertyStore {
    pub fn new() -> MapPropertyStore {
        Default::default()
    }

    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl PropertyStore for MapPropertyStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names() {
        assert_eq!(
            EnvPropertyStore::variable_name("vendor.display.disable_hdr"),
            "VENDOR_DISPLAY_DISABLE_HDR"
        );
    }

    #[test]
    fn typed_getters() {
        let mut store = MapPropertyStore::new();
        store
            .set("a", "TRUE")
            .set("b", "0")
            .set("c", " 42 ")
            .set("d", "-3")
            .set("e", "junk");

        assert!(store.get_bool("a"));
        assert!(!store.get_bool("b"));
        assert!(!store.get_bool("missing"));
        assert_eq!(store.get_u32("c"), Some(42));
        assert_eq!(store.get_i32("d"), Some(-3));
        assert_eq!(store.get_u32("e"), None);
    }
}
