//! An engine that lacks an interface function the bridge needs.

use gdbridge::BridgeConfig;
use gdbridge::error::BridgeError;
use gdbridge::interface::Interface;

#[test]
fn test_missing_entry_names_the_function() {
    let config = BridgeConfig::default().with_logging(false);

    gdbridge_mock::hide_entry("object_method_bind_ptrcall");
    let err = unsafe { Interface::load(gdbridge_mock::get_proc_address, &config) }.err();
    assert_eq!(
        err,
        Some(BridgeError::MissingInterfaceFunction("object_method_bind_ptrcall"))
    );

    gdbridge_mock::show_all_entries();
    assert!(unsafe { Interface::load(gdbridge_mock::get_proc_address, &config) }.is_ok());
}
