#![no_main]

use libfuzzer_sys::fuzz_target;
use syscallmeter::settings::Settings;
use syscallmeter::workload::{Benchmark, BENCHMARK_NAMES};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let settings = Settings {
            options: Some(input.to_string()),
            ..Settings::default()
        };
        // Every strategy must reject or accept the list without panicking
        for name in BENCHMARK_NAMES {
            if let Ok(mut bench) = Benchmark::resolve(name) {
                let _ = bench.apply_options(settings.option_tokens());
            }
        }
    }
});
