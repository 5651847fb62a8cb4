#![no_main]

use libfuzzer_sys::fuzz_target;
use velonet::frag::FragmentReceiver;
use velonet::packet::FragmentInfo;

fuzz_target!(|data: (FragmentInfo, Vec<u8>)| {
    let (info, payload) = data;
    let _ = FragmentReceiver::new().reassemble(0, info, &payload, std::time::Instant::now());
});
