#![no_main]

use libfuzzer_sys::fuzz_target;
use varsync_core::pipeline::{flatten, parse, unflatten, FlattenOptions, FlattenOutput};

// parse() never fails (absent/unparseable input yields an empty tree), and
// flatten(..., as_kv: true) -> unflatten() should reproduce every leaf that
// survived flattening, regardless of how malformed the source bytes are.
fuzz_target!(|data: &[u8]| {
    let tree = parse(Some(data));

    let opts = FlattenOptions {
        as_kv: true,
        ..FlattenOptions::default()
    };
    let FlattenOutput::Flat(flat) = flatten(&tree, &opts) else {
        unreachable!("as_kv: true always yields Flat");
    };

    let rebuilt = unflatten(&flat, &opts.separator);
    let FlattenOutput::Flat(reflat) = flatten(&rebuilt, &opts) else {
        unreachable!("as_kv: true always yields Flat");
    };

    assert_eq!(flat.len(), reflat.len());
});
