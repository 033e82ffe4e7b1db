//! Programming-driver tests against the emulated Spartan-6 model.

use std::path::PathBuf;

use scanchain::adapter::emulated::{EmulatedAdapter, FaultInjector};
use scanchain::adapter::JtagAdapter;
use scanchain::chain::ScanChain;
use scanchain::device::{IndirectOptions, Programmable, ProgramOptions};
use scanchain::image::{BitFile, FirmwareImage};
use scanchain::Error;

const SPARTAN6_LX25: u32 = 0x24004093;
// Small enough to keep the bit-level emulation of a full dump fast.
const FLASH_SIZE: usize = 256 * 1024;

fn spartan6_chain() -> (ScanChain, FaultInjector) {
    let mut adapter = EmulatedAdapter::new("emulated adapter", "EMU-0001");
    adapter.push_spartan6_tap(SPARTAN6_LX25, FLASH_SIZE);
    let faults = adapter.fault_injector();
    let mut chain = ScanChain::new(Box::new(adapter));
    chain.initialize().unwrap();
    (chain, faults)
}

fn bitstream(len: usize) -> FirmwareImage {
    let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
    FirmwareImage::Bit(BitFile {
        design_name: "testdesign;UserID=0xFFFFFFFF".to_string(),
        part_name: "6slx25csg324".to_string(),
        date: "2012/09/14".to_string(),
        time: "21:44:13".to_string(),
        payload,
    })
}

#[test]
fn direct_configuration_asserts_done() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().expect("FPGA is programmable");

    assert!(!driver.is_programmed(&mut chain).unwrap());
    driver
        .program(&mut chain, &bitstream(4096), &ProgramOptions::default())
        .unwrap();
    assert!(driver.is_programmed(&mut chain).unwrap());
}

#[test]
fn erase_clears_done() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    driver
        .program(&mut chain, &bitstream(2048), &ProgramOptions::default())
        .unwrap();
    driver.erase(&mut chain).unwrap();
    assert!(!driver.is_programmed(&mut chain).unwrap());
}

#[test]
fn all_ones_status_is_a_board_fault() {
    let (mut chain, faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    faults.stick_tdo(Some(true));
    let err = driver
        .program(&mut chain, &bitstream(1024), &ProgramOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::BoardFault(_)), "{err}");
}

#[test]
fn data_bits_scale_linearly_with_payload() {
    // The shifted data-bit count is 8n plus a fixed number of control-word
    // bits, so the delta between two payload sizes is exactly 8 * (n1-n2).
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    let before_first = chain.adapter_mut().statistics().unwrap().data_bits;
    driver
        .program(&mut chain, &bitstream(512), &ProgramOptions::default())
        .unwrap();
    let after_first = chain.adapter_mut().statistics().unwrap().data_bits;

    driver
        .program(&mut chain, &bitstream(1024), &ProgramOptions::default())
        .unwrap();
    let after_second = chain.adapter_mut().statistics().unwrap().data_bits;

    let first = after_first - before_first;
    let second = after_second - after_first;
    assert_eq!(second - first, 8 * (1024 - 512));
}

fn write_bounce_image() -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "scanchain-bounce-{}-{:?}.bit",
        std::process::id(),
        std::thread::current().id()
    ));
    let FirmwareImage::Bit(bounce) = bitstream(1024) else {
        unreachable!()
    };
    std::fs::write(&path, bounce.emit()).unwrap();
    path
}

#[test]
fn indirect_flash_program_and_dump() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    let bounce_path = write_bounce_image();
    let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
    let base = 0x0001_0000;

    let options = ProgramOptions {
        indirect: Some(IndirectOptions {
            bus_width: 1,
            base_address: base,
            reboot: false,
            bounce_image: Some(bounce_path.clone()),
        }),
    };
    driver
        .program(
            &mut chain,
            &FirmwareImage::Raw(payload.clone()),
            &options,
        )
        .unwrap();

    let dumped = driver.dump(&mut chain, &options).unwrap();
    assert_eq!(&dumped[..payload.len()], payload.as_slice());
    // The rest of the device reads erased.
    assert!(dumped[payload.len()..payload.len() + 64]
        .iter()
        .all(|&b| b == 0xFF));

    std::fs::remove_file(bounce_path).ok();
}

#[test]
fn indirect_without_bounce_image_is_rejected() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    let options = ProgramOptions {
        indirect: Some(IndirectOptions {
            bounce_image: None,
            ..IndirectOptions::default()
        }),
    };
    let err = driver
        .program(&mut chain, &FirmwareImage::Raw(vec![0; 16]), &options)
        .unwrap_err();
    assert!(matches!(err, Error::Gigo(_)), "{err}");
}

#[test]
fn bpi_widths_are_unimplemented() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    let options = ProgramOptions {
        indirect: Some(IndirectOptions {
            bus_width: 16,
            ..IndirectOptions::default()
        }),
    };
    let err = driver
        .program(&mut chain, &FirmwareImage::Raw(vec![0; 16]), &options)
        .unwrap_err();
    assert!(matches!(err, Error::Unimplemented(_)), "{err}");
}

#[test]
fn jed_image_rejected_for_fpga() {
    let (mut chain, _faults) = spartan6_chain();
    let device = chain.device(0).unwrap().clone();
    let driver = device.programmable().unwrap();

    let jed = scanchain::image::JedFile::new(vec![true; 64], 44, None);
    let err = driver
        .program(
            &mut chain,
            &FirmwareImage::Jed(jed),
            &ProgramOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Gigo(_)), "{err}");
}
