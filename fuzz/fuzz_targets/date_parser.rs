#![no_main]

use libfuzzer_sys::fuzz_target;
use slow_trade_detector::loader::read_instrument_csv;
use slow_trade_detector::records::parse_eod_date;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // must reject or accept, never panic
        let _ = parse_eod_date(input);
    }
    let _ = read_instrument_csv(data);
});
