#![no_main]

use libfuzzer_sys::fuzz_target;
use unigrams::report::{decode_report, write_report, ReportFormat};
use unigrams::Accumulator;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, never panic
    if let Ok(report) = decode_report(data) {
        // Decoded records feed back into an accumulator and re-encode
        let mut acc = Accumulator::new();
        for record in &report.records {
            for (value, &count) in record.counts.as_slice().iter().enumerate() {
                for _ in 0..count.min(4) {
                    acc.update(record.context, value as u8);
                }
            }
        }
        let mut out = Vec::new();
        let _ = write_report(&acc, &mut out, &ReportFormat::default());
    }
});
