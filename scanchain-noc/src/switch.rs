//! The NoC switch: one hardware bridge shared by many TCP clients.
//!
//! Every accepted client is handed an ephemeral endpoint address from
//! `0xC000` upward (sent as a two-byte big-endian greeting) and holds it
//! for the lifetime of its socket. A single router thread moves frames:
//!
//! * bridge → client by destination address; unknown destinations are
//!   dropped and counted,
//! * client → bridge with `from` stamped to the client's address, whatever
//!   the client wrote,
//! * client → client directly when the destination is another ephemeral
//!   address,
//! * broadcast (`0xFFFF`) to every live client except the source.
//!
//! Per-client queues are bounded; when a client stops draining its socket,
//! frames for it are dropped (and counted) rather than ever stalling the
//! bridge path.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::frame::{
    DmaFrame, RpcFrame, SwitchFrame, BROADCAST_ADDR, DMA_HEADER_BYTES, RPC_FRAME_BYTES,
};
use crate::{NocError, Result};

/// Default TCP port of a `nocswitch` instance.
pub const DEFAULT_PORT: u16 = 50124;

/// Wire tag preceding a 16-byte RPC frame.
pub const TAG_RPC: u8 = 0x00;
/// Wire tag preceding a DMA header + payload.
pub const TAG_DMA: u8 = 0x01;

/// First ephemeral endpoint address.
const EPHEMERAL_BASE: u16 = 0xC000;
/// Last allocatable address; 0xFFFF is the broadcast address.
const EPHEMERAL_LAST: u16 = 0xFFFE;

/// Reads one tagged frame from a stream.
pub fn read_frame(stream: &mut impl Read) -> Result<SwitchFrame> {
    let mut tag = [0u8; 1];
    stream.read_exact(&mut tag)?;
    match tag[0] {
        TAG_RPC => {
            let mut raw = [0u8; RPC_FRAME_BYTES];
            stream.read_exact(&mut raw)?;
            Ok(SwitchFrame::Rpc(RpcFrame::unpack(&raw)?))
        }
        TAG_DMA => {
            let mut raw = [0u8; DMA_HEADER_BYTES];
            stream.read_exact(&mut raw)?;
            let (mut frame, len) = DmaFrame::unpack_header(&raw)?;
            let mut payload = vec![0u8; len * 4];
            stream.read_exact(&mut payload)?;
            for word in payload.chunks_exact(4) {
                frame
                    .data
                    .push(u32::from_be_bytes(word.try_into().expect("4-byte chunk")));
            }
            Ok(SwitchFrame::Dma(frame))
        }
        other => Err(NocError::framing(format!("unknown frame tag 0x{other:02x}"))),
    }
}

/// Writes one tagged frame to a stream.
pub fn write_frame(stream: &mut impl Write, frame: &SwitchFrame) -> Result<()> {
    match frame {
        SwitchFrame::Rpc(rpc) => {
            let packed = rpc.pack()?;
            let mut out = Vec::with_capacity(1 + packed.len());
            out.push(TAG_RPC);
            out.extend_from_slice(&packed);
            stream.write_all(&out)?;
        }
        SwitchFrame::Dma(dma) => {
            let packed = dma.pack()?;
            let mut out = Vec::with_capacity(1 + packed.len());
            out.push(TAG_DMA);
            out.extend_from_slice(&packed);
            stream.write_all(&out)?;
        }
    }
    Ok(())
}

/// The switch's view of the hardware bridge: frames for the bridge go into
/// `tx`, frames from the bridge come out of `rx`.
pub struct BridgeChannels {
    pub tx: Sender<SwitchFrame>,
    pub rx: Receiver<SwitchFrame>,
}

/// Bridges over a TCP connection (e.g. a simulator or a JTAG-attached
/// relay speaking the tagged frame format).
pub fn tcp_bridge(stream: TcpStream) -> Result<BridgeChannels> {
    stream.set_nodelay(true)?;
    let (to_bridge_tx, to_bridge_rx) = mpsc::channel::<SwitchFrame>();
    let (from_bridge_tx, from_bridge_rx) = mpsc::channel::<SwitchFrame>();

    let mut writer = stream.try_clone()?;
    std::thread::spawn(move || {
        for frame in to_bridge_rx {
            if let Err(e) = write_frame(&mut writer, &frame) {
                tracing::error!("bridge write failed: {e}");
                break;
            }
        }
    });

    let mut reader = stream;
    std::thread::spawn(move || loop {
        match read_frame(&mut reader) {
            Ok(frame) => {
                if from_bridge_tx.send(frame).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("bridge read failed: {e}");
                break;
            }
        }
    });

    Ok(BridgeChannels {
        tx: to_bridge_tx,
        rx: from_bridge_rx,
    })
}

/// A bridge stand-in that reflects every frame back with `from` and `to`
/// swapped. Useful for bring-up without hardware.
pub fn loopback_bridge() -> BridgeChannels {
    let (to_bridge_tx, to_bridge_rx) = mpsc::channel::<SwitchFrame>();
    let (from_bridge_tx, from_bridge_rx) = mpsc::channel::<SwitchFrame>();

    std::thread::spawn(move || {
        for mut frame in to_bridge_rx {
            let from = frame.from_addr();
            let to = frame.to_addr();
            match &mut frame {
                SwitchFrame::Rpc(f) => {
                    f.from = to;
                    f.to = from;
                }
                SwitchFrame::Dma(f) => {
                    f.from = to;
                    f.to = from;
                }
            }
            if from_bridge_tx.send(frame).is_err() {
                break;
            }
        }
    });

    BridgeChannels {
        tx: to_bridge_tx,
        rx: from_bridge_rx,
    }
}

/// Frame-drop counters, monotonic for the life of the switch.
#[derive(Debug, Default)]
pub struct SwitchCounters {
    /// Frames whose destination endpoint was not allocated.
    pub dropped_unknown_dest: AtomicU64,
    /// Frames dropped because the destination client's queue was full.
    pub dropped_backpressure: AtomicU64,
}

/// Tuning knobs for the switch.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Depth of each client's bounded outbound queue.
    pub client_queue_depth: usize,
    /// How long a released endpoint address stays out of the free pool, so
    /// in-flight replies cannot land on a new owner.
    pub release_grace: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        SwitchConfig {
            client_queue_depth: 64,
            release_grace: Duration::from_millis(500),
        }
    }
}

/// Hands out ephemeral endpoint addresses, recycling released ones after
/// the grace interval.
struct EndpointAllocator {
    next: u16,
    released: VecDeque<(u16, Instant)>,
    grace: Duration,
}

impl EndpointAllocator {
    fn new(grace: Duration) -> Self {
        EndpointAllocator {
            next: EPHEMERAL_BASE,
            released: VecDeque::new(),
            grace,
        }
    }

    fn allocate(&mut self) -> Option<u16> {
        if self.next <= EPHEMERAL_LAST {
            let addr = self.next;
            self.next += 1;
            return Some(addr);
        }
        match self.released.front() {
            Some((addr, when)) if when.elapsed() >= self.grace => {
                let addr = *addr;
                self.released.pop_front();
                Some(addr)
            }
            _ => None,
        }
    }

    fn release(&mut self, addr: u16) {
        self.released.push_back((addr, Instant::now()));
    }
}

enum RouterMsg {
    Register {
        addr: u16,
        tx: SyncSender<SwitchFrame>,
    },
    Deregister {
        addr: u16,
    },
    FromClient {
        addr: u16,
        frame: SwitchFrame,
    },
    FromBridge {
        frame: SwitchFrame,
    },
}

/// The adapter-sharing NoC switch daemon core.
pub struct NocSwitch {
    listener: TcpListener,
    router_tx: Sender<RouterMsg>,
    allocator: Arc<Mutex<EndpointAllocator>>,
    counters: Arc<SwitchCounters>,
    config: SwitchConfig,
}

impl NocSwitch {
    /// Binds the client listener and starts the router and bridge pumps.
    pub fn bind(
        addr: impl ToSocketAddrs,
        bridge: BridgeChannels,
        config: SwitchConfig,
    ) -> Result<NocSwitch> {
        let listener = TcpListener::bind(addr)?;
        let counters = Arc::new(SwitchCounters::default());
        let allocator = Arc::new(Mutex::new(EndpointAllocator::new(config.release_grace)));

        let (router_tx, router_rx) = mpsc::channel::<RouterMsg>();

        // Pump bridge receive into the router.
        {
            let router_tx = router_tx.clone();
            std::thread::spawn(move || {
                for frame in bridge.rx {
                    if router_tx.send(RouterMsg::FromBridge { frame }).is_err() {
                        break;
                    }
                }
            });
        }

        // The router owns the fan-out table and the bridge send side.
        {
            let counters = Arc::clone(&counters);
            let allocator = Arc::clone(&allocator);
            let bridge_tx = bridge.tx;
            std::thread::spawn(move || {
                router_loop(router_rx, bridge_tx, counters, allocator);
            });
        }

        Ok(NocSwitch {
            listener,
            router_tx,
            allocator,
            counters,
            config,
        })
    }

    /// Address of the client listener.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The switch's drop counters.
    pub fn counters(&self) -> Arc<SwitchCounters> {
        Arc::clone(&self.counters)
    }

    /// Accepts clients forever.
    pub fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            let endpoint = { self.allocator.lock().expect("allocator poisoned").allocate() };
            let Some(endpoint) = endpoint else {
                tracing::warn!("endpoint space exhausted, refusing client {peer}");
                continue;
            };
            tracing::info!("client {peer} is endpoint 0x{endpoint:04x}");
            if let Err(e) = self.start_client(stream, endpoint) {
                tracing::warn!("client 0x{endpoint:04x} setup failed: {e}");
                self.allocator
                    .lock()
                    .expect("allocator poisoned")
                    .release(endpoint);
            }
        }
    }

    fn start_client(&self, stream: TcpStream, endpoint: u16) -> Result<()> {
        stream.set_nodelay(true)?;
        let mut greeting = stream.try_clone()?;
        greeting.write_all(&endpoint.to_be_bytes())?;

        let (client_tx, client_rx) = mpsc::sync_channel(self.config.client_queue_depth);
        self.router_tx
            .send(RouterMsg::Register {
                addr: endpoint,
                tx: client_tx,
            })
            .map_err(|_| NocError::framing("router is gone"))?;

        // Writer half: drains the bounded queue into the socket.
        let mut writer = stream.try_clone()?;
        std::thread::spawn(move || {
            for frame in client_rx {
                if let Err(e) = write_frame(&mut writer, &frame) {
                    tracing::debug!("client 0x{endpoint:04x} write failed: {e}");
                    break;
                }
            }
            let _ = writer.shutdown(std::net::Shutdown::Both);
        });

        // Reader half: stamps and hands frames to the router.
        let router_tx = self.router_tx.clone();
        let allocator = Arc::clone(&self.allocator);
        let mut reader = stream;
        std::thread::spawn(move || {
            loop {
                match read_frame(&mut reader) {
                    Ok(frame) => {
                        if router_tx
                            .send(RouterMsg::FromClient {
                                addr: endpoint,
                                frame,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(NocError::Network(e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        tracing::info!("endpoint 0x{endpoint:04x} disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("endpoint 0x{endpoint:04x} read failed: {e}");
                        break;
                    }
                }
            }
            let _ = router_tx.send(RouterMsg::Deregister { addr: endpoint });
            allocator
                .lock()
                .expect("allocator poisoned")
                .release(endpoint);
        });

        Ok(())
    }
}

fn router_loop(
    router_rx: Receiver<RouterMsg>,
    bridge_tx: Sender<SwitchFrame>,
    counters: Arc<SwitchCounters>,
    _allocator: Arc<Mutex<EndpointAllocator>>,
) {
    let mut clients: HashMap<u16, SyncSender<SwitchFrame>> = HashMap::new();

    let deliver = |clients: &mut HashMap<u16, SyncSender<SwitchFrame>>,
                   counters: &SwitchCounters,
                   to: u16,
                   frame: SwitchFrame| {
        match clients.get(&to) {
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counters.dropped_backpressure.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("endpoint 0x{to:04x} is not draining, frame dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    clients.remove(&to);
                }
            },
            None => {
                counters.dropped_unknown_dest.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("no endpoint 0x{to:04x}, frame dropped");
            }
        }
    };

    for msg in router_rx {
        match msg {
            RouterMsg::Register { addr, tx } => {
                clients.insert(addr, tx);
            }
            RouterMsg::Deregister { addr } => {
                clients.remove(&addr);
            }
            RouterMsg::FromClient { addr, mut frame } => {
                // The switch decides the source address, not the client.
                frame.set_from(addr);
                let to = frame.to_addr();
                if to == BROADCAST_ADDR {
                    let targets: Vec<u16> =
                        clients.keys().copied().filter(|&a| a != addr).collect();
                    for target in targets {
                        deliver(&mut clients, &counters, target, frame.clone());
                    }
                    if bridge_tx.send(frame).is_err() {
                        tracing::error!("bridge send side is gone");
                    }
                } else if to >= EPHEMERAL_BASE {
                    deliver(&mut clients, &counters, to, frame);
                } else if bridge_tx.send(frame).is_err() {
                    tracing::error!("bridge send side is gone");
                }
            }
            RouterMsg::FromBridge { frame } => {
                let to = frame.to_addr();
                if to == BROADCAST_ADDR {
                    let targets: Vec<u16> = clients.keys().copied().collect();
                    for target in targets {
                        deliver(&mut clients, &counters, target, frame.clone());
                    }
                } else {
                    deliver(&mut clients, &counters, to, frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_hands_out_sequential_addresses() {
        let mut alloc = EndpointAllocator::new(Duration::from_millis(50));
        assert_eq!(alloc.allocate(), Some(0xC000));
        assert_eq!(alloc.allocate(), Some(0xC001));
    }

    #[test]
    fn allocator_respects_grace_interval() {
        let mut alloc = EndpointAllocator::new(Duration::from_millis(50));
        alloc.next = EPHEMERAL_LAST + 1;
        alloc.release(0xC005);
        // Fresh release is still in grace.
        assert_eq!(alloc.allocate(), None);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(alloc.allocate(), Some(0xC005));
    }

    #[test]
    fn allocator_exhausts() {
        let mut alloc = EndpointAllocator::new(Duration::from_millis(50));
        alloc.next = EPHEMERAL_LAST;
        assert_eq!(alloc.allocate(), Some(EPHEMERAL_LAST));
        assert_eq!(alloc.allocate(), None);
    }
}
