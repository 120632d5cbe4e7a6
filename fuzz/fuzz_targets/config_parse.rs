#![no_main]

use ferry_config::parse_config;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = parse_config(content) {
        let table = config.target_table("app");
        if config.validate("app").is_ok() {
            assert!(!table.is_empty());
            assert!(config.retry_config().max_attempts >= 1);
        }
    }
});
