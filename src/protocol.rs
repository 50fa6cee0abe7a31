//! The line-oriented request/response protocol described by the wire
//! format: one request per line (`BATCHPUT` excepted, which reads further
//! lines after its header), one response per line starting with `OK` or
//! `ERROR`.

use crate::error::KvsError;

/// A parsed request line. `BatchPutHeader` carries only the item count;
/// the caller (the server's connection handler) is responsible for then
/// reading exactly that many further lines from the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `PUT <key> <value>`
    Put { key: String, value: String },
    /// `READ <key>`
    Read { key: String },
    /// `DELETE <key>`
    Delete { key: String },
    /// `READRANGE <start> <end>`
    ReadRange { start: String, end: String },
    /// `BATCHPUT <n>` — the header line only; `n` item lines follow.
    BatchPutHeader { count: usize },
    /// `SHUTDOWN`
    Shutdown,
}

/// Parses a single request line (without its trailing newline).
pub fn parse_request(line: &str) -> Result<Request, KvsError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(2, ' ');
    let verb = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| KvsError::BadRequest("empty request".into()))?;
    let rest = parts.next().unwrap_or("");

    match verb {
        "PUT" => {
            let mut kv = rest.splitn(2, ' ');
            let key = kv
                .next()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| KvsError::BadRequest("PUT requires a key".into()))?;
            let value = kv
                .next()
                .ok_or_else(|| KvsError::BadRequest("PUT requires a value".into()))?;
            Ok(Request::Put {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "READ" => {
            if rest.is_empty() {
                return Err(KvsError::BadRequest("READ requires a key".into()));
            }
            Ok(Request::Read { key: rest.to_string() })
        }
        "DELETE" => {
            if rest.is_empty() {
                return Err(KvsError::BadRequest("DELETE requires a key".into()));
            }
            Ok(Request::Delete { key: rest.to_string() })
        }
        "READRANGE" => {
            let mut se = rest.splitn(2, ' ');
            let start = se
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| KvsError::BadRequest("READRANGE requires a start key".into()))?;
            let end = se
                .next()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| KvsError::BadRequest("READRANGE requires an end key".into()))?;
            Ok(Request::ReadRange {
                start: start.to_string(),
                end: end.to_string(),
            })
        }
        "BATCHPUT" => {
            let count: usize = rest
                .trim()
                .parse()
                .map_err(|_| KvsError::BadRequest("BATCHPUT requires an item count".into()))?;
            Ok(Request::BatchPutHeader { count })
        }
        "SHUTDOWN" => Ok(Request::Shutdown),
        other => Err(KvsError::BadRequest(format!("unknown command {:?}", other))),
    }
}

/// Parses one `<key> <value>` item line of a BATCHPUT body, splitting on
/// the first space exactly as PUT does.
pub fn parse_batch_item(line: &str) -> Result<(String, String), KvsError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut kv = line.splitn(2, ' ');
    let key = kv
        .next()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| KvsError::BadRequest("batch item requires a key".into()))?;
    let value = kv
        .next()
        .ok_or_else(|| KvsError::BadRequest("batch item requires a value".into()))?;
    Ok((key.to_string(), value.to_string()))
}

/// Formats a bare `OK` success response.
pub fn format_ok() -> String {
    "OK\n".to_string()
}

/// Formats a READ success response: `OK <value>` or `OK NULL`.
pub fn format_read_ok(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("OK {}\n", v),
        None => "OK NULL\n".to_string(),
    }
}

/// Formats a READRANGE success response: `OK` followed by the JSON array
/// of `[key, value]` pairs.
pub fn format_range_ok(pairs: &[(String, String)]) -> Result<String, KvsError> {
    let json = serde_json::to_string(pairs)?;
    Ok(format!("OK {}\n", json))
}

/// Formats an `ERROR <detail>` response. `detail` must not itself contain
/// a newline; the wire format is one response per line.
pub fn format_error(detail: &str) -> String {
    format!("ERROR {}\n", detail.replace('\n', " "))
}
