#![no_main]

use diffx_pe::{ParseOptions, SliceReader, PE};
use libfuzzer_sys::fuzz_target;
use std::io::Read;

fuzz_target!(|data: &[u8]| {
    let options = ParseOptions::default().with_max_table_entries(4096);
    let Ok(pe) = PE::parse_with_options(data, &options) else {
        return;
    };

    let reader = SliceReader::new(data);
    if let Some(resources) = pe.resources() {
        for leaf in resources.leaves() {
            let _ = pe.resource_data(&reader, leaf.data);
        }
    }

    let mut image = pe.virtual_image(&reader);
    let mut buf = [0u8; 256];
    let _ = image.read(&mut buf);
});
