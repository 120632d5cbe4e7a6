#![no_main]

use ferry::version::parse_version;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(version) = parse_version(raw) {
        // Accepted versions are trimmed and never carry their own prefix.
        assert_eq!(version.as_str(), raw.trim());
        assert!(!version.as_str().starts_with('v'));
        assert_eq!(version.tag().as_str(), format!("v{}", version.as_str()));
    }
});
