#![no_main]
use libarchive_bridge::{ArchiveSource, ReadOptions};
use libfuzzer_sys::{
    arbitrary::{Arbitrary, Unstructured},
    fuzz_target,
};
use std::io;

/// Source that hands out the input in fuzzer-chosen chunk sizes
#[derive(Debug, Arbitrary)]
struct Script {
    chunks: Vec<u16>,
    fail_at: Option<u8>,
    data: Vec<u8>,
}

struct Scripted {
    script: Script,
    pos: usize,
    calls: usize,
}

impl ArchiveSource for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.calls += 1;
        if self.script.fail_at == Some(self.calls as u8) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted failure"));
        }
        let want = self
            .script
            .chunks
            .get(self.calls % self.script.chunks.len().max(1))
            .map_or(buf.len(), |&n| n as usize + 1);
        let n = want.min(buf.len()).min(self.script.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.script.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let Ok(script) = Script::arbitrary(&mut u) else {
        return;
    };
    let source = Scripted {
        script,
        pos: 0,
        calls: 0,
    };
    let Ok(reader) = ReadOptions::new().block_size(1024).open_source(source) else {
        return;
    };
    for entry in reader.take(64) {
        match entry {
            Ok(mut entry) => {
                let _ = entry.read_to_vec();
            }
            Err(_) => break,
        }
    }
});
