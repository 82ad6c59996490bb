use std::io::Write;
use std::net::{self, TcpStream};
use std::time::Duration;

use log::error;

use crate::cmd::Cmd;
use crate::errors::RedisResult;
use crate::parser::Parser;
use crate::types::Reply;

/// A single pipelined connection to the backing store.
///
/// Commands can either be round-tripped one at a time with
/// [`Connection::command`], or queued with [`Connection::append`] and
/// drained with [`Connection::get_reply`].  Appended commands are only
/// written to the socket when the first reply is requested, so a whole
/// transaction goes out in one write.
pub struct Connection {
    stream: TcpStream,
    parser: Parser,
    sendbuf: Vec<u8>,
    open: bool,
}

impl Connection {
    /// Opens a TCP connection to `host:port`.
    pub fn connect(host: &str, port: u16) -> RedisResult<Connection> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true)?;
        Ok(Connection {
            stream,
            parser: Parser::new(),
            sendbuf: Vec::new(),
            open: true,
        })
    }

    /// Returns false once the connection has seen an unrecoverable
    /// failure.  A closed connection will not produce further replies.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Sets the read deadline.  `None` means block indefinitely.
    /// An expired deadline surfaces as an I/O error from the read path.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        self.stream.set_read_timeout(dur)?;
        Ok(())
    }

    /// Sets the write deadline.  `None` means block indefinitely.
    pub fn set_write_timeout(&self, dur: Option<Duration>) -> RedisResult<()> {
        self.stream.set_write_timeout(dur)?;
        Ok(())
    }

    /// Queues a command in the send buffer without awaiting a reply.
    pub fn append(&mut self, cmd: &Cmd) {
        cmd.write_packed_command(&mut self.sendbuf);
    }

    /// Sends a command and reads its reply.
    ///
    /// Any previously appended commands are flushed first, so this must
    /// not be interleaved with an unfinished pipeline.
    pub fn command(&mut self, cmd: &Cmd) -> RedisResult<Reply> {
        self.append(cmd);
        self.get_reply()
    }

    /// Reads the next pipelined reply, flushing the send buffer first.
    pub fn get_reply(&mut self) -> RedisResult<Reply> {
        self.flush()?;
        let result = self.parser.parse_value(&mut self.stream);
        if let Err(e) = &result {
            if e.is_connection_dropped() {
                let _ = self.stream.shutdown(net::Shutdown::Both);
                self.open = false;
            }
        }
        result
    }

    fn flush(&mut self) -> RedisResult<()> {
        if self.sendbuf.is_empty() {
            return Ok(());
        }
        let result = self.stream.write_all(&self.sendbuf);
        self.sendbuf.clear();
        if let Err(e) = result {
            self.open = false;
            fail!(e);
        }
        Ok(())
    }

    /// Reads one reply and checks that it is a status carrying exactly
    /// `expected`.  Mismatches are logged together with `context`.
    pub fn expect_status(&mut self, expected: &str, context: &str) -> bool {
        match self.get_reply() {
            Ok(Reply::Status(status)) => {
                if status == expected {
                    true
                } else {
                    error!(
                        "expected status '{expected}' in the context of {context}, \
                         but received '{status}'"
                    );
                    false
                }
            }
            Ok(other) => {
                error!(
                    "expected a status reply in the context of {context}, \
                     but received a {}",
                    other.type_str()
                );
                false
            }
            Err(e) => {
                error!("failed to read reply in the context of {context}: {e}");
                false
            }
        }
    }

    /// Applies [`Connection::expect_status`] `n` times.  All `n` replies
    /// are consumed even when some of them mismatch.
    pub fn expect_n_status(&mut self, n: usize, expected: &str, context: &str) -> bool {
        let mut rv = true;
        for _ in 0..n {
            if !self.expect_status(expected, context) {
                rv = false;
            }
        }
        rv
    }
}
