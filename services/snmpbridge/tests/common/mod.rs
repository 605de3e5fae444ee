//! In-process Modbus TCP slave for integration tests
//!
//! Serves FC01-04 from per-unit register maps. Unknown addresses answer with exception 0x02; a
//! stalled simulator accepts requests but never answers.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;
const GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// One unit's data
#[derive(Debug, Default, Clone)]
pub struct DataModel {
    pub coils: HashMap<u16, bool>,
    pub discrete_inputs: HashMap<u16, bool>,
    pub holding_registers: HashMap<u16, u16>,
    pub input_registers: HashMap<u16, u16>,
}

#[derive(Debug, Default)]
struct Shared {
    units: RwLock<HashMap<u8, DataModel>>,
    requests: AtomicUsize,
    connections: AtomicUsize,
    stalled: AtomicBool,
}

pub struct ModbusTcpSimulator {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ModbusTcpSimulator {
    /// Bind an ephemeral port on localhost and start serving
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let accept_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("Simulator connection from {}", peer);
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = handle_client(stream, shared).await;
                });
            }
        });

        Self { addr, shared, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn set_holding(&self, unit_id: u8, address: u16, value: u16) {
        let mut units = self.shared.units.write().await;
        units
            .entry(unit_id)
            .or_default()
            .holding_registers
            .insert(address, value);
    }

    pub async fn set_input(&self, unit_id: u8, address: u16, value: u16) {
        let mut units = self.shared.units.write().await;
        units
            .entry(unit_id)
            .or_default()
            .input_registers
            .insert(address, value);
    }

    pub async fn set_coil(&self, unit_id: u8, address: u16, value: bool) {
        let mut units = self.shared.units.write().await;
        units.entry(unit_id).or_default().coils.insert(address, value);
    }

    /// Stop answering (requests are still counted)
    pub fn stall(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Requests received so far
    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for ModbusTcpSimulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_client(mut stream: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let mut buffer: Vec<u8> = Vec::with_capacity(260);
    let mut chunk = [0u8; 260];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);

        // Complete MBAP frames only
        while buffer.len() >= 7 {
            let length = usize::from(u16::from_be_bytes([buffer[4], buffer[5]]));
            let frame_length = 6 + length;
            if buffer.len() < frame_length {
                break;
            }
            let frame: Vec<u8> = buffer.drain(..frame_length).collect();
            shared.requests.fetch_add(1, Ordering::SeqCst);

            if shared.stalled.load(Ordering::SeqCst) {
                continue;
            }

            let response = process_request(&frame, &shared).await;
            stream.write_all(&response).await?;
            stream.flush().await?;
        }
    }
}

async fn process_request(frame: &[u8], shared: &Shared) -> Vec<u8> {
    let unit_id = frame[6];
    let pdu = &frame[7..];

    let response_pdu = match pdu.first() {
        Some(&fc @ 0x01..=0x04) if pdu.len() >= 5 => {
            let start = u16::from_be_bytes([pdu[1], pdu[2]]);
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
            let units = shared.units.read().await;
            match units.get(&unit_id) {
                Some(model) => read(fc, start, quantity, model),
                None => vec![fc | 0x80, GATEWAY_TARGET_FAILED],
            }
        },
        Some(&fc) => vec![fc | 0x80, ILLEGAL_FUNCTION],
        None => vec![0x80, ILLEGAL_DATA_VALUE],
    };

    let mut response = Vec::with_capacity(7 + response_pdu.len());
    response.extend_from_slice(&frame[0..4]);
    response.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
    response.push(unit_id);
    response.extend_from_slice(&response_pdu);
    response
}

fn read(fc: u8, start: u16, quantity: u16, model: &DataModel) -> Vec<u8> {
    let max = if fc <= 0x02 { 2000 } else { 125 };
    if quantity == 0 || quantity > max {
        return vec![fc | 0x80, ILLEGAL_DATA_VALUE];
    }

    let addresses = (0..quantity).map(|i| start.wrapping_add(i));
    match fc {
        0x01 | 0x02 => {
            let bits = if fc == 0x01 {
                &model.coils
            } else {
                &model.discrete_inputs
            };
            let mut values = Vec::with_capacity(usize::from(quantity));
            for addr in addresses {
                match bits.get(&addr) {
                    Some(v) => values.push(*v),
                    None => return vec![fc | 0x80, ILLEGAL_DATA_ADDRESS],
                }
            }
            let mut response = vec![fc, values.len().div_ceil(8) as u8];
            for byte in values.chunks(8) {
                let packed = byte
                    .iter()
                    .enumerate()
                    .fold(0u8, |acc, (i, bit)| acc | (u8::from(*bit) << i));
                response.push(packed);
            }
            response
        },
        _ => {
            let registers = if fc == 0x03 {
                &model.holding_registers
            } else {
                &model.input_registers
            };
            let mut response = vec![fc, (quantity * 2) as u8];
            for addr in addresses {
                match registers.get(&addr) {
                    Some(v) => response.extend_from_slice(&v.to_be_bytes()),
                    None => return vec![fc | 0x80, ILLEGAL_DATA_ADDRESS],
                }
            }
            response
        },
    }
}
