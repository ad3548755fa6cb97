use std::io::{self, BufRead, Write};
use std::net::UdpSocket;
use std::sync::mpsc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use ctcp::substrate::{DatagramSocket, InputSource, InputStatus, OutputSink, OutputStatus, SendStatus};
use ctcp::{Connection, ConnectionConfig};

struct UdpDatagram {
    socket: UdpSocket,
}

impl DatagramSocket for UdpDatagram {
    fn send(&mut self, buf: &[u8]) -> SendStatus {
        match self.socket.send(buf) {
            Ok(n) => SendStatus::Sent(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SendStatus::WouldBlock,
            Err(e) => {
                log::warn!("udp send failed: {e}");
                SendStatus::Fatal
            }
        }
    }
}

// lines typed on stdin, handed across from a dedicated reader thread so the
// main loop never blocks waiting on the terminal
struct StdinSource {
    rx: mpsc::Receiver<Vec<u8>>,
    eof: bool,
}

impl InputSource for StdinSource {
    fn read(&mut self, buf: &mut [u8]) -> InputStatus {
        if self.eof {
            return InputStatus::Eof;
        }
        match self.rx.try_recv() {
            Ok(line) => {
                let n = line.len().min(buf.len());
                buf[..n].copy_from_slice(&line[..n]);
                InputStatus::Data(n)
            }
            Err(mpsc::TryRecvError::Empty) => InputStatus::WouldBlock,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.eof = true;
                InputStatus::Eof
            }
        }
    }
}

struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> OutputStatus {
        let mut stdout = io::stdout();
        if stdout.write_all(buf).is_err() {
            return OutputStatus::Fatal;
        }
        let _ = stdout.flush();
        OutputStatus::Written(buf.len())
    }

    fn write_eof(&mut self) -> OutputStatus {
        println!(">>> peer closed the connection");
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

    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(&server_addr)?;
    socket.set_nonblocking(true)?;
    info!("connecting to {server_addr}");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line.into_bytes()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut input = StdinSource { rx, eof: false };
    let mut output = StdoutSink;
    let mut conn = Connection::new(UdpDatagram { socket: socket.try_clone()? }, ConnectionConfig::default());

    let mut recv_buf = [0u8; 2048];
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
