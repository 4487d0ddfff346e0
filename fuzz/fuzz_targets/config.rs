// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

#![no_main]

use libfuzzer_sys::fuzz_target;
use refind_rs_core::config::BootConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = core::str::from_utf8(data) {
        let _ = BootConfig::parse(content);
    }
});
