#![allow(dead_code)]

//! An in-process stand-in for the backing store.
//!
//! Speaks just enough of the wire protocol for the cache: `GET`,
//! `SET [PX ms]`, `DEL`, `HSET`, `HGETALL`, `HDEL`, `PING` and
//! `MULTI`/`EXEC` queueing, over an in-memory string and hash state with
//! millisecond expiry.  A configurable reply delay makes cancellation
//! windows testable, and the server can be stopped and restarted on the
//! same port to simulate a transport failure.

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct State {
    strings: HashMap<Vec<u8>, (Vec<u8>, Option<Instant>)>,
    hashes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
}

pub struct MockRedisServer {
    port: u16,
    running: Arc<AtomicBool>,
    clients: Arc<Mutex<Vec<TcpStream>>>,
    accept: Option<JoinHandle<()>>,
}

impl MockRedisServer {
    pub fn start() -> MockRedisServer {
        Self::start_inner(0, Duration::ZERO)
    }

    /// Binds a specific port, for restart-after-failure tests.
    pub fn start_on(port: u16) -> MockRedisServer {
        Self::start_inner(port, Duration::ZERO)
    }

    /// Starts a server whose every reply lags by `delay`.
    pub fn start_with_reply_delay(delay: Duration) -> MockRedisServer {
        Self::start_inner(0, delay)
    }

    fn start_inner(port: u16, reply_delay: Duration) -> MockRedisServer {
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let running = Arc::new(AtomicBool::new(true));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(State::default()));

        let accept = {
            let running = Arc::clone(&running);
            let clients = Arc::clone(&clients);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(_) => break,
                    };
                    clients.lock().unwrap().push(stream.try_clone().unwrap());
                    let state = Arc::clone(&state);
                    thread::spawn(move || serve_client(stream, state, reply_delay));
                }
            })
        };

        MockRedisServer {
            port,
            running,
            clients,
            accept: Some(accept),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host_port(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Stops accepting, then severs every established connection.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake the accept loop so it observes the flag.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        for client in self.clients.lock().unwrap().drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockRedisServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_client(stream: TcpStream, state: Arc<Mutex<State>>, reply_delay: Duration) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(stream) => stream,
        Err(_) => return,
    });
    let mut out = stream;
    // Commands queued between MULTI and EXEC.
    let mut queued: Option<Vec<Vec<Vec<u8>>>> = None;

    while let Some(command) = read_command(&mut reader) {
        if command.is_empty() {
            break;
        }
        if !reply_delay.is_zero() {
            thread::sleep(reply_delay);
        }

        let name = command[0].to_ascii_uppercase();
        let reply = if name == b"MULTI" {
            queued = Some(Vec::new());
            b"+OK\r\n".to_vec()
        } else if name == b"EXEC" {
            match queued.take() {
                Some(commands) => {
                    let mut state = state.lock().unwrap();
                    let mut reply = format!("*{}\r\n", commands.len()).into_bytes();
                    for command in &commands {
                        reply.extend_from_slice(&execute(&mut state, command));
                    }
                    reply
                }
                None => b"-ERR EXEC without MULTI\r\n".to_vec(),
            }
        } else if let Some(commands) = queued.as_mut() {
            commands.push(command);
            b"+QUEUED\r\n".to_vec()
        } else {
            execute(&mut state.lock().unwrap(), &command)
        };

        if out.write_all(&reply).is_err() {
            break;
        }
    }
}

fn execute(state: &mut State, command: &[Vec<u8>]) -> Vec<u8> {
    let name = command[0].to_ascii_uppercase();
    match name.as_slice() {
        b"PING" => b"+PONG\r\n".to_vec(),
        b"GET" => {
            let now = Instant::now();
            if let Some((_, Some(deadline))) = state.strings.get(&command[1]) {
                if *deadline <= now {
                    state.strings.remove(&command[1]);
                }
            }
            match state.strings.get(&command[1]) {
                Some((value, _)) => data_reply(value),
                None => b"$-1\r\n".to_vec(),
            }
        }
        b"SET" => {
            let expiry = if command.len() >= 5 && command[3].eq_ignore_ascii_case(b"PX") {
                let ms: u64 = String::from_utf8_lossy(&command[4]).parse().unwrap();
                Some(Instant::now() + Duration::from_millis(ms))
            } else {
                None
            };
            state
                .strings
                .insert(command[1].clone(), (command[2].clone(), expiry));
            b"+OK\r\n".to_vec()
        }
        b"DEL" => {
            let mut removed = 0i64;
            for key in &command[1..] {
                if state.strings.remove(key).is_some() {
                    removed += 1;
                }
            }
            int_reply(removed)
        }
        b"HSET" => {
            let hash = state.hashes.entry(command[1].clone()).or_default();
            let added = i64::from(hash.insert(command[2].clone(), command[3].clone()).is_none());
            int_reply(added)
        }
        b"HGETALL" => {
            let mut reply = Vec::new();
            match state.hashes.get(&command[1]) {
                Some(hash) => {
                    reply.extend_from_slice(format!("*{}\r\n", hash.len() * 2).as_bytes());
                    for (field, value) in hash {
                        reply.extend_from_slice(&data_reply(field));
                        reply.extend_from_slice(&data_reply(value));
                    }
                }
                None => reply.extend_from_slice(b"*0\r\n"),
            }
            reply
        }
        b"HDEL" => {
            let mut removed = 0i64;
            if let Some(hash) = state.hashes.get_mut(&command[1]) {
                for field in &command[2..] {
                    if hash.remove(field).is_some() {
                        removed += 1;
                    }
                }
                if hash.is_empty() {
                    state.hashes.remove(&command[1]);
                }
            }
            int_reply(removed)
        }
        _ => format!(
            "-ERR unknown command '{}'\r\n",
            String::from_utf8_lossy(&name)
        )
        .into_bytes(),
    }
}

fn data_reply(data: &[u8]) -> Vec<u8> {
    let mut reply = format!("${}\r\n", data.len()).into_bytes();
    reply.extend_from_slice(data);
    reply.extend_from_slice(b"\r\n");
    reply
}

fn int_reply(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

/// Reads one client command, an array of bulk strings.  Returns `None`
/// on a closed or garbled connection.
fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<Vec<u8>>> {
    let header = read_line(reader)?;
    if !header.starts_with('*') {
        return None;
    }
    let count: usize = header[1..].parse().ok()?;

    let mut command = Vec::with_capacity(count);
    for _ in 0..count {
        let header = read_line(reader)?;
        if !header.starts_with('$') {
            return None;
        }
        let len: usize = header[1..].parse().ok()?;
        let mut payload = vec![0u8; len + 2];
        reader.read_exact(&mut payload).ok()?;
        payload.truncate(len);
        command.push(payload);
    }
    Some(command)
}

fn read_line(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).ok()?;
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    String::from_utf8(line).ok()
}
