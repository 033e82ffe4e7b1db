//! State-engine tests against the emulated adapter.

use scanchain::adapter::emulated::EmulatedAdapter;
use scanchain::adapter::JtagAdapter;
use scanchain::chain::ScanChain;
use scanchain::device::DeviceKind;
use scanchain::Error;

fn two_device_chain() -> ScanChain {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4BA00477, 4);
    adapter.push_generic_tap(0x4A0A9049, 8);
    ScanChain::new(Box::new(adapter))
}

fn single_device_chain(ir_len: usize) -> ScanChain {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4A0A9049, ir_len);
    ScanChain::new(Box::new(adapter))
}

#[test]
fn discovery_finds_both_devices() {
    let mut chain = two_device_chain();
    chain.initialize().unwrap();

    assert_eq!(chain.device_count(), 2);
    assert_eq!(chain.idcode(0).unwrap(), 0x4BA00477);
    assert_eq!(chain.idcode(1).unwrap(), 0x4A0A9049);
    assert_eq!(*chain.device(0).unwrap().kind(), DeviceKind::ArmDap);
    assert_eq!(*chain.device(1).unwrap().kind(), DeviceKind::Generic);
}

#[test]
fn discovery_is_idempotent() {
    let mut chain = two_device_chain();
    chain.initialize().unwrap();
    let first: Vec<u32> = (0..2).map(|i| chain.idcode(i).unwrap()).collect();

    chain.initialize().unwrap();
    let second: Vec<u32> = (0..2).map(|i| chain.idcode(i).unwrap()).collect();
    assert_eq!(first, second);
}

#[test]
fn stuck_tdo_is_a_board_fault() {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4BA00477, 4);
    adapter.set_stuck_tdo(Some(true));
    let mut chain = ScanChain::new(Box::new(adapter));
    assert!(matches!(chain.initialize(), Err(Error::BoardFault(_))));

    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4BA00477, 4);
    adapter.set_stuck_tdo(Some(false));
    let mut chain = ScanChain::new(Box::new(adapter));
    assert!(matches!(chain.initialize(), Err(Error::BoardFault(_))));
}

#[test]
fn device_index_out_of_range_is_gigo() {
    let mut chain = two_device_chain();
    chain.initialize().unwrap();
    assert!(matches!(chain.device(2), Err(Error::Gigo(_))));
    assert!(matches!(
        chain.set_ir(7, &[0x01], 4),
        Err(Error::Gigo(_))
    ));
}

#[test]
fn multi_device_scans_are_unimplemented() {
    let mut chain = two_device_chain();
    chain.initialize().unwrap();

    let err = chain.set_ir(0, &[0x0F], 4).unwrap_err();
    match err {
        Error::Unimplemented(msg) => {
            assert_eq!(msg, "Bypassing extra devices not yet supported!")
        }
        other => panic!("expected Unimplemented, got {other:?}"),
    }
    assert!(matches!(
        chain.scan_dr(0, &[0u8; 4], None, 32),
        Err(Error::Unimplemented(_))
    ));
}

#[test]
fn repeated_ir_loads_are_elided() {
    let mut chain = single_device_chain(6);
    chain.initialize().unwrap();

    chain.set_ir(0, &[0b000001], 6).unwrap();
    let after_first = chain.adapter_mut().statistics().unwrap().data_bits;

    chain.set_ir(0, &[0b000001], 6).unwrap();
    let after_second = chain.adapter_mut().statistics().unwrap().data_bits;
    assert_eq!(after_first, after_second, "cache hit must not shift");

    chain.set_ir(0, &[0b000010], 6).unwrap();
    let after_third = chain.adapter_mut().statistics().unwrap().data_bits;
    assert_eq!(after_third, after_second + 6);
}

#[test]
fn tap_reset_invalidates_ir_cache() {
    let mut chain = single_device_chain(6);
    chain.initialize().unwrap();

    chain.set_ir(0, &[0b000001], 6).unwrap();
    chain.reset_to_idle().unwrap();
    let before = chain.adapter_mut().statistics().unwrap().data_bits;
    chain.set_ir(0, &[0b000001], 6).unwrap();
    let after = chain.adapter_mut().statistics().unwrap().data_bits;
    assert_eq!(after, before + 6, "reset must drop the cached IR");
}

#[test]
fn dr_contents_survive_scans() {
    // With a data register selected, a scan returns the previous register
    // contents while loading new ones: scanning P then zeros hands P back.
    let mut chain = single_device_chain(6);
    chain.initialize().unwrap();
    chain.set_ir(0, &[0b000001], 6).unwrap();

    let pattern = [0xEF, 0xBE, 0xAD, 0xDE, 0x78, 0x56, 0x34, 0x12];
    let mut first = [0u8; 8];
    chain
        .scan_dr(0, &pattern, Some(&mut first), 64)
        .unwrap();
    assert_eq!(first, [0u8; 8], "register powers up clear");

    let mut second = [0u8; 8];
    chain
        .scan_dr(0, &[0u8; 8], Some(&mut second), 64)
        .unwrap();
    assert_eq!(second, pattern);
}

#[test]
fn split_scan_matches_blocking_scan() {
    let mut chain = single_device_chain(6);
    chain.initialize().unwrap();
    chain.set_ir(0, &[0b000001], 6).unwrap();

    let pattern = [0x5A, 0xA5, 0x3C, 0xC3, 0x0F, 0xF0, 0x99, 0x66];
    chain.scan_dr(0, &pattern, None, 64).unwrap();

    // The split read half returns what the blocking path would have.
    let mut capture = [0u8; 8];
    chain
        .scan_dr_split_write(0, &[0u8; 8], Some(&mut capture), 64)
        .unwrap();
    chain
        .scan_dr_split_read(0, Some(&mut capture), 64)
        .unwrap();
    assert_eq!(capture, pattern);
}

#[test]
fn deferred_scans_flush_on_commit() {
    let mut chain = single_device_chain(6);
    chain.initialize().unwrap();
    chain.set_ir(0, &[0b000001], 6).unwrap();

    let pattern = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    chain.scan_dr_deferred(0, &pattern, 64).unwrap();
    chain.idle_clocks_deferred(8).unwrap();
    chain.commit().unwrap();

    let mut capture = [0u8; 8];
    chain
        .scan_dr(0, &[0u8; 8], Some(&mut capture), 64)
        .unwrap();
    assert_eq!(capture, pattern);
}
