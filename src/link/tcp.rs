use std::io::{Read, Write};
use std::net::TcpStream;

// Blocking std::net transport for the three host channels. One socket
// per channel; the command socket flips between non-blocking (per-frame
// poll) and blocking (pause wait).

const CODE_LEN: usize = 4;

pub struct CommandChannel {
    stream: TcpStream,
    buf: [u8; CODE_LEN],
    filled: usize,
}

impl CommandChannel {
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            buf: [0; CODE_LEN],
            filled: 0,
        })
    }

    /// Non-blocking read of one 4-byte code. `Ok(None)` when no complete
    /// code is pending. A partially received code is kept across calls.
    pub fn poll(&mut self) -> std::io::Result<Option<i32>> {
        loop {
            match self.stream.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    self.filled += n;
                    if self.filled == CODE_LEN {
                        self.filled = 0;
                        return Ok(Some(i32::from_le_bytes(self.buf)));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Blocking read of the next code, for the pause wait. No timeout.
    pub fn wait_code(&mut self) -> std::io::Result<i32> {
        self.stream.set_nonblocking(false)?;
        let result = self.stream.read_exact(&mut self.buf[self.filled..]);
        self.stream.set_nonblocking(true)?;
        result?;
        self.filled = 0;
        Ok(i32::from_le_bytes(self.buf))
    }
}

pub struct DataChannel {
    stream: TcpStream,
}

impl DataChannel {
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// One whole bucket per call; the flush after the full write is the
    /// consumer's only ordering guarantee.
    pub fn send(&mut self, buffer: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buffer)?;
        self.stream.flush()
    }
}

pub struct InfoChannel {
    stream: TcpStream,
}

impl InfoChannel {
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// NUL-terminated text notice, best effort.
    pub fn send_text(&mut self, message: &str) -> std::io::Result<()> {
        self.stream.write_all(message.as_bytes())?;
        self.stream.write_all(&[0])?;
        self.stream.flush()
    }
}
