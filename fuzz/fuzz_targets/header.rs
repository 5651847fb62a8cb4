#![no_main]

use libfuzzer_sys::fuzz_target;
use velonet::packet::PacketPool;

fuzz_target!(|data: &[u8]| {
    let mut pool = PacketPool::with_limit(8);
    if let Some(packet) = pool.get_and_read(data) {
        let _ = packet.payload();
        pool.recycle(packet);
    }
});
