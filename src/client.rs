//! A small blocking client for the line protocol of §4.9. Used by the
//! `bitkv-client` CLI and by the integration tests; this is the in-crate
//! counterpart of the spec's "test client" collaborator.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::error::{KvsError, Result};

/// A connection to a running server.
pub struct KvsClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl KvsClient {
    /// Connects to a server at `addr`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(KvsClient {
            reader,
            writer: stream,
        })
    }

    /// Sends `PUT key value`.
    pub fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.send_line(&format!("PUT {} {}", key, value))?;
        self.expect_ok()
    }

    /// Sends `READ key`, returning `None` for `OK NULL`.
    pub fn read(&mut self, key: &str) -> Result<Option<String>> {
        self.send_line(&format!("READ {}", key))?;
        let line = self.read_response_line()?;
        let body = expect_ok_prefix(&line)?;
        if body == "NULL" {
            Ok(None)
        } else {
            Ok(Some(body.to_string()))
        }
    }

    /// Sends `DELETE key`.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.send_line(&format!("DELETE {}", key))?;
        self.expect_ok()
    }

    /// Sends `READRANGE start end`, parsing the JSON array of pairs.
    pub fn read_range(&mut self, start: &str, end: &str) -> Result<Vec<(String, String)>> {
        self.send_line(&format!("READRANGE {} {}", start, end))?;
        let line = self.read_response_line()?;
        let body = expect_ok_prefix(&line)?;
        let pairs: Vec<(String, String)> = serde_json::from_str(body)?;
        Ok(pairs)
    }

    /// Sends a `BATCHPUT` header followed by one line per item.
    pub fn batch_put(&mut self, items: &[(String, String)]) -> Result<()> {
        self.send_line(&format!("BATCHPUT {}", items.len()))?;
        for (key, value) in items {
            self.send_line(&format!("{} {}", key, value))?;
        }
        self.expect_ok()
    }

    /// Sends `SHUTDOWN`, asking the server to stop accepting connections.
    pub fn shutdown(&mut self) -> Result<()> {
        self.send_line("SHUTDOWN")?;
        self.expect_ok()
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_response_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(KvsError::StringError(
                "connection closed before a response arrived".into(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn expect_ok(&mut self) -> Result<()> {
        let line = self.read_response_line()?;
        expect_ok_prefix(&line)?;
        Ok(())
    }
}

fn expect_ok_prefix(line: &str) -> Result<&str> {
    if let Some(rest) = line.strip_prefix("OK") {
        Ok(rest.trim_start())
    } else if let Some(detail) = line.strip_prefix("ERROR") {
        Err(KvsError::StringError(detail.trim_start().to_string()))
    } else {
        Err(KvsError::StringError(format!(
            "malformed response line: {:?}",
            line
        )))
    }
}
