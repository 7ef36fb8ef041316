//! Fuzz target for deriving the local replica name from a remote address.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_monitor::MonitorConfig;

fuzz_target!(|address: &str| {
    let config = MonitorConfig {
        remote_address: address.to_string(),
        ..Default::default()
    };

    let name = config.local_name();
    assert!(!name.is_empty());
    assert!(!name.contains('/'));
});
