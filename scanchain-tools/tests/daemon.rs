//! End-to-end tests: a jtagd instance serving an emulated adapter, driven
//! by the networked adapter client over localhost.

use std::net::SocketAddr;

use scanchain::adapter::emulated::EmulatedAdapter;
use scanchain::adapter::network::NetworkedAdapter;
use scanchain::adapter::{GpioAdapter, GpioPin, JtagAdapter};
use scanchain::chain::ScanChain;
use scanchain_tools::jtagd::JtagdServer;

fn start_daemon(adapter: EmulatedAdapter) -> SocketAddr {
    let server = JtagdServer::bind("127.0.0.1:0", Box::new(adapter)).unwrap();
    let addr = server.local_addr().unwrap();
    std::thread::spawn(move || server.run());
    addr
}

fn two_device_adapter() -> EmulatedAdapter {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4BA00477, 4);
    adapter.push_generic_tap(0x4A0A9049, 8);
    adapter
}

#[test]
fn identity_queries_cross_the_wire() {
    let addr = start_daemon(two_device_adapter());
    let mut client = NetworkedAdapter::connect(addr).unwrap();

    assert_eq!(client.name().unwrap(), "emulated adapter");
    assert_eq!(client.serial().unwrap(), "EMU-0001");
    assert_eq!(client.user_id().unwrap(), "EMU-0001");
    assert_eq!(client.frequency_hz().unwrap(), 10_000_000);
    assert!(client.split_scan_supported().unwrap());
}

#[test]
fn remote_chain_discovery() {
    let addr = start_daemon(two_device_adapter());
    let mut client = NetworkedAdapter::connect(addr).unwrap();
    assert_eq!(client.name().unwrap(), "emulated adapter");

    let mut chain = ScanChain::new(Box::new(client));
    chain.initialize().unwrap();
    assert_eq!(chain.device_count(), 2);
    assert_eq!(chain.idcode(0).unwrap(), 0x4BA00477);
    assert_eq!(chain.idcode(1).unwrap(), 0x4A0A9049);
}

#[test]
fn remote_scans_and_commit() {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4A0A9049, 6);
    let addr = start_daemon(adapter);

    let client = NetworkedAdapter::connect(addr).unwrap();
    let mut chain = ScanChain::new(Box::new(client));
    chain.initialize().unwrap();
    chain.set_ir(0, &[0b000001], 6).unwrap();

    let pattern = [0xEF, 0xBE, 0xAD, 0xDE, 0x78, 0x56, 0x34, 0x12];
    chain.scan_dr_deferred(0, &pattern, 64).unwrap();
    chain.commit().unwrap();

    let mut capture = [0u8; 8];
    chain
        .scan_dr(0, &[0u8; 8], Some(&mut capture), 64)
        .unwrap();
    assert_eq!(capture, pattern);
}

#[test]
fn remote_split_scans() {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_generic_tap(0x4A0A9049, 6);
    let addr = start_daemon(adapter);

    let client = NetworkedAdapter::connect(addr).unwrap();
    let mut chain = ScanChain::new(Box::new(client));
    chain.initialize().unwrap();
    chain.set_ir(0, &[0b000001], 6).unwrap();

    let pattern = [0x5A, 0xA5, 0x3C, 0xC3, 0x0F, 0xF0, 0x99, 0x66];
    chain.scan_dr(0, &pattern, None, 64).unwrap();

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
fn performance_counters_are_monotonic() {
    let addr = start_daemon(two_device_adapter());
    let client = NetworkedAdapter::connect(addr).unwrap();
    let mut chain = ScanChain::new(Box::new(client));

    let before = chain.adapter_mut().statistics().unwrap();
    chain.initialize().unwrap();
    let after = chain.adapter_mut().statistics().unwrap();

    assert!(after.data_bits > before.data_bits);
    assert!(after.mode_bits > before.mode_bits);
    assert_eq!(after.recoverable_errors, 0);

    chain.idle_clocks(128).unwrap();
    let later = chain.adapter_mut().statistics().unwrap();
    assert_eq!(later.idle_clocks, after.idle_clocks + 128);
}

#[test]
fn gpio_bank_over_the_wire() {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001").with_gpio(12);
    adapter.push_generic_tap(0x4BA00477, 4);
    let addr = start_daemon(adapter);

    let mut client = NetworkedAdapter::connect(addr).unwrap();
    let gpio = client.as_gpio().expect("server advertised GPIO");
    assert_eq!(gpio.pin_count(), 12);

    let mut pins = gpio.read_state().unwrap();
    assert_eq!(pins[3], GpioPin::default());
    pins[3] = GpioPin {
        value: true,
        output: true,
    };
    gpio.write_state(&pins).unwrap();
    assert_eq!(gpio.read_state().unwrap()[3].to_byte(), 0x03);
}

#[test]
fn two_clients_share_one_adapter() {
    let addr = start_daemon(two_device_adapter());

    let mut first = NetworkedAdapter::connect(addr).unwrap();
    let mut second = NetworkedAdapter::connect(addr).unwrap();

    // Interleaved identity requests from both clients serialize cleanly.
    for _ in 0..8 {
        assert_eq!(first.name().unwrap(), "emulated adapter");
        assert_eq!(second.serial().unwrap(), "EMU-0001");
    }
}
