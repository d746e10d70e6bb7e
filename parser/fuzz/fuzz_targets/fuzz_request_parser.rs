#![no_main]

use libfuzzer_sys::fuzz_target;
use parser::request::RequestParser;

fuzz_target!(|data: &[u8]| {
    if data.len() > 2048 {
        return;
    }
    let mut buf = [0u8; 2048];
    buf[..data.len()].copy_from_slice(data);
    let mut scanned = 0;
    let mut line_start = 0;
    let mut req = RequestParser::new();
    let _ = req.parse(&mut buf, data.len(), &mut scanned, &mut line_start);
});
