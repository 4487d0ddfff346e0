// SPDX-FileCopyrightText: 2025 some100 <ootinnyoo@outlook.com>
// SPDX-License-Identifier: MIT

#![no_main]

use libfuzzer_sys::fuzz_target;
use refind_rs_core::loader::{Arch, Validity, classify_header, is_pe_for};

fuzz_target!(|data: &[u8]| {
    for arch in [Arch::X64, Arch::Ia32, Arch::Aa64] {
        let validity = classify_header(data, arch);
        if is_pe_for(data, arch) {
            assert_eq!(validity, Validity::ValidExecutable);
        }
    }
});
