use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::UdpSocket;
use std::rc::Rc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use ctcp::substrate::{DatagramSocket, InputSource, InputStatus, OutputSink, OutputStatus, SendStatus};
use ctcp::{Connection, ConnectionConfig};

struct UdpDatagram {
    socket: UdpSocket,
    peer: std::net::SocketAddr,
}

impl DatagramSocket for UdpDatagram {
    fn send(&mut self, buf: &[u8]) -> SendStatus {
        match self.socket.send_to(buf, self.peer) {
            Ok(n) => SendStatus::Sent(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendStatus::WouldBlock,
            Err(e) => {
                log::warn!("udp send failed: {e}");
                SendStatus::Fatal
            }
        }
    }
}

// everything the server reads is queued here and read straight back out, so
// the demo echoes bytes through the same connection that received them
#[derive(Default)]
struct EchoQueue {
    bytes: VecDeque<u8>,
    eof: bool,
}

struct EchoInput(Rc<RefCell<EchoQueue>>);

impl InputSource for EchoInput {
    fn read(&mut self, buf: &mut [u8]) -> InputStatus {
        let mut q = self.0.borrow_mut();
        if q.bytes.is_empty() {
            return if q.eof { InputStatus::Eof } else { InputStatus::WouldBlock };
        }
        let n = q.bytes.len().min(buf.len());
        for slot in &mut buf[..n] {
            *slot = q.bytes.pop_front().unwrap();
        }
        InputStatus::Data(n)
    }
}

struct EchoOutput(Rc<RefCell<EchoQueue>>);

impl OutputSink for EchoOutput {
    fn write(&mut self, buf: &[u8]) -> OutputStatus {
        println!(
            ">>> echoing: {:?}",
            String::from_utf8_lossy(buf)
        );
        self.0.borrow_mut().bytes.extend(buf);
        OutputStatus::Written(buf.len())
    }

    fn write_eof(&mut self) -> OutputStatus {
        self.0.borrow_mut().eof = true;
        OutputStatus::Written(0)
    }

    fn buffer_space(&self) -> usize {
        usize::MAX
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

fn main() -> Result<(), ctcp::Error> {
    env_logger::init();

    let bind_addr = std::env::args().nth(1).unwrap_or_else(|| "0.0.0.0:9090".to_string());
    let socket = UdpSocket::bind(&bind_addr)?;
    info!("waiting for a peer on {bind_addr}");

    let mut recv_buf = [0u8; 2048];
    let (n, peer) = socket.recv_from(&mut recv_buf)?;
    info!("accepted peer {peer}");
    socket.set_nonblocking(true)?;

    let queue = Rc::new(RefCell::new(EchoQueue::default()));
    let mut input = EchoInput(queue.clone());
    let mut output = EchoOutput(queue);
    let mut conn = Connection::new(
        UdpDatagram {
            socket: socket.try_clone()?,
            peer,
        },
        ConnectionConfig::default(),
    );

    conn.on_segment(&recv_buf[..n], &mut output, now_ms());

    loop {
        conn.on_readable(&mut input, now_ms());

        match socket.recv(&mut recv_buf) {
            Ok(n) => conn.on_segment(&recv_buf[..n], &mut output, now_ms()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                log::warn!("udp recv failed: {e}");
                break;
            }
        }

        if conn.on_tick(&mut output, now_ms()) {
            break;
        }

        thread::sleep(std::time::Duration::from_millis(ConnectionConfig::default().tick_period_ms));
    }

    Ok(())
}
