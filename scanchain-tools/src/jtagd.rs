//! The adapter-sharing daemon core.
//!
//! One mutex protects the physical adapter; every request locks it for the
//! duration of that request only, so long bulk scans from one client
//! cannot starve the others between requests. The wire protocol is the
//! little-endian opcode scheme of [`scanchain::adapter::protocol`].

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use scanchain::adapter::protocol as proto;
use scanchain::adapter::{GpioAdapter, GpioPin, JtagAdapter};
use scanchain::bits;
use scanchain::{Error, Result};

/// A running `jtagd` instance sharing one adapter among TCP clients.
pub struct JtagdServer {
    listener: TcpListener,
    adapter: Arc<Mutex<Box<dyn JtagAdapter>>>,
}

impl JtagdServer {
    /// Binds the listener; the daemon starts serving on [`JtagdServer::run`].
    pub fn bind(addr: impl ToSocketAddrs, adapter: Box<dyn JtagAdapter>) -> Result<JtagdServer> {
        Ok(JtagdServer {
            listener: TcpListener::bind(addr)?,
            adapter: Arc::new(Mutex::new(adapter)),
        })
    }

    /// Address of the listener.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients forever, one thread per connection.
    pub fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            tracing::info!("client connected from {peer}");
            let adapter = Arc::clone(&self.adapter);
            std::thread::spawn(move || {
                if let Err(e) = serve_client(stream, adapter) {
                    tracing::warn!("client {peer} dropped: {e}");
                } else {
                    tracing::info!("client {peer} disconnected");
                }
            });
        }
    }
}

fn read_u32(stream: &mut TcpStream) -> Result<u32> {
    let mut raw = [0u8; 4];
    stream.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

fn read_u8(stream: &mut TcpStream) -> Result<u8> {
    let mut raw = [0u8; 1];
    stream.read_exact(&mut raw)?;
    Ok(raw[0])
}

fn send_string(stream: &mut TcpStream, text: &str) -> Result<()> {
    if text.len() > u16::MAX as usize {
        return Err(Error::Gigo("string responses must fit 64 KiB".to_string()));
    }
    stream.write_all(&(text.len() as u16).to_le_bytes())?;
    stream.write_all(text.as_bytes())?;
    Ok(())
}

fn serve_client(mut stream: TcpStream, adapter: Arc<Mutex<Box<dyn JtagAdapter>>>) -> Result<()> {
    stream.set_nodelay(true)?;

    loop {
        let mut op = [0u8; 1];
        match stream.read_exact(&mut op) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        match op[0] {
            proto::OP_GET_NAME => {
                let name = adapter.lock().unwrap().name()?;
                send_string(&mut stream, &name)?;
            }
            proto::OP_GET_SERIAL => {
                let serial = adapter.lock().unwrap().serial()?;
                send_string(&mut stream, &serial)?;
            }
            proto::OP_GET_USERID => {
                let user_id = adapter.lock().unwrap().user_id()?;
                send_string(&mut stream, &user_id)?;
            }
            proto::OP_GET_FREQ => {
                let freq = adapter.lock().unwrap().frequency_hz()?;
                stream.write_all(&freq.to_le_bytes())?;
            }
            proto::OP_SHIFT_DATA | proto::OP_SHIFT_DATA_WO => {
                let want_read = op[0] == proto::OP_SHIFT_DATA;
                let last_tms = read_u8(&mut stream)? != 0;
                let count = read_u32(&mut stream)? as usize;
                let mut tx = vec![0u8; bits::bytes_for(count)];
                stream.read_exact(&mut tx)?;

                if want_read {
                    let mut rx = vec![0u8; bits::bytes_for(count)];
                    adapter
                        .lock()
                        .unwrap()
                        .shift_data(last_tms, &tx, Some(&mut rx), count)?;
                    stream.write_all(&rx)?;
                } else {
                    adapter
                        .lock()
                        .unwrap()
                        .shift_data(last_tms, &tx, None, count)?;
                }
            }
            proto::OP_SHIFT_DATA_WRITE_ONLY => {
                let last_tms = read_u8(&mut stream)? != 0;
                let count = read_u32(&mut stream)? as usize;
                let want_response = read_u8(&mut stream)? != 0;
                let mut tx = vec![0u8; bits::bytes_for(count)];
                stream.read_exact(&mut tx)?;

                let mut rx = vec![0u8; bits::bytes_for(count)];
                let result = adapter.lock().unwrap().shift_data_write_only(
                    last_tms,
                    &tx,
                    want_response.then_some(rx.as_mut_slice()),
                    count,
                );
                match result {
                    Ok(true) => stream.write_all(&[proto::STATUS_DEFERRED])?,
                    Ok(false) => {
                        stream.write_all(&[proto::STATUS_DONE])?;
                        if want_response {
                            stream.write_all(&rx)?;
                        }
                    }
                    Err(e) => {
                        stream.write_all(&[proto::STATUS_FAILED])?;
                        return Err(e);
                    }
                }
            }
            proto::OP_SHIFT_DATA_READ_ONLY => {
                let count = read_u32(&mut stream)? as usize;
                let mut rx = vec![0u8; bits::bytes_for(count)];
                let result = adapter
                    .lock()
                    .unwrap()
                    .shift_data_read_only(Some(&mut rx), count);
                match result {
                    Ok(true) => {
                        stream.write_all(&[proto::STATUS_DEFERRED])?;
                        stream.write_all(&rx)?;
                    }
                    Ok(false) => stream.write_all(&[proto::STATUS_DONE])?,
                    Err(e) => {
                        stream.write_all(&[proto::STATUS_FAILED])?;
                        return Err(e);
                    }
                }
            }
            proto::OP_DUMMY_CLOCK => {
                let count = read_u32(&mut stream)? as usize;
                adapter.lock().unwrap().idle_clocks(count)?;
            }
            proto::OP_DUMMY_CLOCK_DEFERRED => {
                let count = read_u32(&mut stream)? as usize;
                adapter.lock().unwrap().idle_clocks_deferred(count)?;
            }
            proto::OP_TLR => adapter.lock().unwrap().test_logic_reset()?,
            proto::OP_ENTER_SIR => adapter.lock().unwrap().enter_shift_ir()?,
            proto::OP_LEAVE_E1IR => adapter.lock().unwrap().leave_exit1_ir()?,
            proto::OP_ENTER_SDR => adapter.lock().unwrap().enter_shift_dr()?,
            proto::OP_LEAVE_E1DR => adapter.lock().unwrap().leave_exit1_dr()?,
            proto::OP_RESET_IDLE => adapter.lock().unwrap().reset_to_idle()?,
            proto::OP_COMMIT => {
                adapter.lock().unwrap().flush()?;
                stream.write_all(&[0u8])?;
            }
            proto::OP_SPLIT_SUPPORTED => {
                let supported = adapter.lock().unwrap().split_scan_supported()?;
                stream.write_all(&[u8::from(supported)])?;
            }
            proto::OP_HAS_GPIO => {
                let has = adapter.lock().unwrap().as_gpio().is_some();
                stream.write_all(&[u8::from(has)])?;
            }
            proto::OP_GET_GPIO_PIN_COUNT => {
                let count = adapter
                    .lock()
                    .unwrap()
                    .as_gpio()
                    .map(|g| g.pin_count())
                    .unwrap_or(0);
                stream.write_all(&[count as u8])?;
            }
            proto::OP_READ_GPIO_STATE => {
                let mut guard = adapter.lock().unwrap();
                let Some(gpio) = guard.as_gpio() else {
                    return Err(Error::Gigo("adapter has no GPIO bank".to_string()));
                };
                let pins = gpio.read_state()?;
                let bytes: Vec<u8> = pins.iter().map(|p| p.to_byte()).collect();
                drop(guard);
                stream.write_all(&bytes)?;
            }
            proto::OP_WRITE_GPIO_STATE => {
                let mut guard = adapter.lock().unwrap();
                let Some(gpio) = guard.as_gpio() else {
                    return Err(Error::Gigo("adapter has no GPIO bank".to_string()));
                };
                let mut bytes = vec![0u8; gpio.pin_count()];
                stream.read_exact(&mut bytes)?;
                let pins: Vec<GpioPin> = bytes.iter().map(|&b| GpioPin::from_byte(b)).collect();
                gpio.write_state(&pins)?;
            }
            perf @ (proto::OP_PERF_SHIFT
            | proto::OP_PERF_RECOV
            | proto::OP_PERF_DATA
            | proto::OP_PERF_MODE
            | proto::OP_PERF_DUMMY) => {
                let stats = adapter.lock().unwrap().statistics()?;
                let value = match perf {
                    proto::OP_PERF_SHIFT => stats.shift_ops,
                    proto::OP_PERF_RECOV => stats.recoverable_errors,
                    proto::OP_PERF_DATA => stats.data_bits,
                    proto::OP_PERF_MODE => stats.mode_bits,
                    _ => stats.idle_clocks,
                };
                stream.write_all(&value.to_le_bytes())?;
            }
            proto::OP_QUIT => return Ok(()),
            other => {
                return Err(Error::Framing(format!("unknown jtagd opcode 0x{other:02x}")));
            }
        }
    }
}
