#![no_main]

use diffx_pe::PEHeaders;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Headers only; malformed input must produce an error, never a panic.
    if let Ok(headers) = PEHeaders::from_slice(data) {
        let resolver = headers.resolver();
        for section in &headers.sections {
            let _ = resolver.resolve(section.virtual_address);
        }
    }
});
