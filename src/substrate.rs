#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    Data(usize),
    WouldBlock,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    Written(usize),
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent(usize),
    WouldBlock,
    Fatal,
}

// never blocks: stdin, a pipe, an application write buffer, ...
pub trait InputSource {
    fn read(&mut self, buf: &mut [u8]) -> InputStatus;
}

// never blocks: stdout, a pipe, an application read buffer, ...
pub trait OutputSink {
    fn write(&mut self, buf: &[u8]) -> OutputStatus;
    fn write_eof(&mut self) -> OutputStatus;
    fn buffer_space(&self) -> usize;
}

// never blocks
pub trait DatagramSocket {
    fn send(&mut self, buf: &[u8]) -> SendStatus;
}
