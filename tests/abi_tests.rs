//! Loading against an engine that reports an unsupported version.
//!
//! Runs in its own binary: the interface is published once per process.

use gdbridge::BridgeConfig;
use gdbridge::error::BridgeError;
use gdbridge::{init, interface};

#[test]
fn test_old_engine_rejected_then_current_accepted() {
    gdbridge_mock::set_version(3, 5, 0);
    let config = BridgeConfig::default().with_logging(false);
    let err = unsafe {
        init::initialize(gdbridge_mock::get_proc_address, gdbridge_mock::library(), config.clone())
    }
    .unwrap_err();
    assert_eq!(
        err,
        BridgeError::AbiVersionMismatch {
            required: "4.1".into(),
            found: "3.5.0".into(),
        }
    );
    assert!(!interface::is_loaded());
    assert_eq!(interface::get().err(), Some(BridgeError::NotInitialized));

    gdbridge_mock::set_version(4, 2, 0);
    unsafe {
        init::initialize(gdbridge_mock::get_proc_address, gdbridge_mock::library(), config)
    }
    .unwrap();
    assert!(interface::is_loaded());
    assert_eq!(init::library_token(), gdbridge_mock::library());

    let strict = BridgeConfig::default().with_min_engine_version(4, 3).with_logging(false);
    let version = gdbridge::sys::EngineVersion {
        major: 4,
        minor: 2,
        patch: 0,
        abi_hash: 0,
    };
    assert!(!strict.accepts(&version));

    init::deinitialize().unwrap();
}
