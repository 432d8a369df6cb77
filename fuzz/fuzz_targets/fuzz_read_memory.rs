#![no_main]
use libarchive_bridge::ReadOptions;
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes through the engine's own memory reader: every error must
// come back as a Result, never a crash
fuzz_target!(|data: &[u8]| {
    let Ok(reader) = ReadOptions::new().open_memory(data) else {
        return;
    };
    for entry in reader.take(64) {
        let Ok(mut entry) = entry else {
            break;
        };
        let _ = entry.pathname();
        let _ = entry.info();
        if let Ok(blocks) = entry.get_blocks_sized(512) {
            for block in blocks.take(256) {
                if block.is_err() {
                    break;
                }
            }
        }
    }
});
