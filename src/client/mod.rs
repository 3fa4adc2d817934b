//! Client-side plumbing shared by the producer and reader executables:
//! target-address parsing, the per-client logical clock discipline, the
//! connect retry loop, and response parsing.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::node::payload;
use crate::node::LamportClock;
use crate::utils::WeathersetError;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

/// Number of connection attempts before giving up.
const CONNECT_RETRIES: u8 = 3;

/// Fixed backoff between connection attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Parsed aggregation node target of form
/// `[scheme://]host:port[?id=<station>]`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TargetAddr {
    /// Hostname or IP of the aggregation node.
    pub host: String,

    /// Port of the aggregation node.
    pub port: u16,

    /// Optional station ID from the query part (readers only).
    pub station_id: Option<String>,
}

impl FromStr for TargetAddr {
    type Err = WeathersetError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let rest = match url.split_once("://") {
            Some((_, rest)) => rest,
            None => url,
        };
        let (host, tail) = rest.split_once(':').ok_or_else(|| {
            WeathersetError::msg(format!("no port in target URL '{}'", url))
        })?;
        if host.is_empty() {
            return Err(WeathersetError::msg(format!(
                "no host in target URL '{}'",
                url
            )));
        }

        let (port, station_id) = match tail.split_once('?') {
            Some((port, query)) => {
                let id = query.strip_prefix("id=").ok_or_else(|| {
                    WeathersetError::msg(format!(
                        "unrecognized query '{}' in target URL",
                        query
                    ))
                })?;
                (port, Some(id.to_string()))
            }
            None => (tail, None),
        };

        Ok(TargetAddr {
            host: host.into(),
            port: port.parse()?,
            station_id,
        })
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parsed response from the aggregation node.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Response {
    /// Numeric status code from the status line.
    pub status: u16,

    /// `Lamport-Clock` header value if the node sent one.
    pub lamport: Option<i64>,

    /// Response body (may be empty).
    pub body: String,
}

/// One client endpoint talking to the aggregation node. Owns the client's
/// independent logical clock; each request opens a fresh connection (the
/// node serves one request per connection).
#[derive(Debug)]
pub struct ServiceStub {
    /// Aggregation node target.
    target: TargetAddr,

    /// Client-owned logical clock, incremented before every send and merged
    /// with every reply's clock value.
    clock: LamportClock,
}

impl ServiceStub {
    /// Creates a new endpoint for the given target.
    pub fn new(target: TargetAddr) -> Self {
        ServiceStub {
            target,
            clock: LamportClock::new(),
        }
    }

    /// Read-only view of the client clock.
    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    /// Sends one PUT carrying the given payload and returns the parsed
    /// response, after merging its clock value.
    pub async fn put_record(
        &mut self,
        payload: &str,
    ) -> Result<Response, WeathersetError> {
        let mut stream = connect_with_retry(&self.target).await?;
        self.clock.increment();

        let request = format!(
            "PUT /weather.json HTTP/1.1\r\n\
             User-Agent: WeathersetProducer/0.1\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Lamport-Clock: {}\r\n\r\n{}",
            payload.len(),
            self.clock.current(),
            payload
        );
        stream.write_all(request.as_bytes()).await?;

        let response = read_response(&mut stream).await?;
        if let Some(received) = response.lamport {
            self.clock.sync(received)?;
        }
        Ok(response)
    }

    /// Sends one GET (for the target's station ID if one was given) and
    /// returns the parsed response, after merging its clock value.
    pub async fn get_records(&mut self) -> Result<Response, WeathersetError> {
        let mut stream = connect_with_retry(&self.target).await?;
        self.clock.increment();

        let path = match &self.target.station_id {
            Some(id) => format!("/weather.json?id={}", id),
            None => "/weather.json".into(),
        };
        let request = format!(
            "GET {} HTTP/1.1\r\n\
             User-Agent: WeathersetReader/0.1\r\n\
             Lamport-Clock: {}\r\n\r\n",
            path,
            self.clock.current()
        );
        stream.write_all(request.as_bytes()).await?;

        let response = read_response(&mut stream).await?;
        if let Some(received) = response.lamport {
            self.clock.sync(received)?;
        }
        Ok(response)
    }
}

/// Connects to the target with a fixed-count, fixed-backoff retry loop.
async fn connect_with_retry(
    target: &TargetAddr,
) -> Result<TcpStream, WeathersetError> {
    let mut retries = CONNECT_RETRIES;
    loop {
        match TcpStream::connect((target.host.as_str(), target.port)).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                pf_warn!(
                    "could not connect to '{}', retrying ({} attempts left): {}",
                    target,
                    retries,
                    err
                );
                time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Reads one response: status line, headers (merging none itself; the
/// caller owns the clock), then a `Content-Length`-delimited body if the
/// header was present, else whatever remains until EOF.
async fn read_response<S>(stream: &mut S) -> Result<Response, WeathersetError>
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let status: u16 = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| {
            WeathersetError::msg(format!("malformed status line '{}'", line.trim()))
        })?
        .parse()?;

    let mut lamport = None;
    let mut content_length: Option<usize> = None;
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break; // node closed after a headers-only response
        }
        let header = line.trim();
        if header.is_empty() {
            break;
        }
        if let Some(value) = header.strip_prefix("Lamport-Clock:") {
            lamport = Some(value.trim().parse()?);
        } else if let Some(value) = header.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse()?);
        }
    }

    let body = match content_length {
        Some(len) => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            String::from_utf8(buf)?
        }
        None => {
            let mut rest = String::new();
            reader.read_to_string(&mut rest).await?;
            rest
        }
    };

    Ok(Response {
        status,
        lamport,
        body,
    })
}

/// Reads a `key: value` lines source file and renders it as a wire payload.
/// A file with no usable lines yields an empty payload (which the node
/// treats as a no-op heartbeat).
pub fn source_to_payload(path: &Path) -> Result<String, WeathersetError> {
    let raw = fs::read_to_string(path)?;

    let mut fields = Vec::new();
    for line in raw.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    if fields.is_empty() {
        pf_warn!("no usable fields in source file '{}'", path.display());
        return Ok(String::new());
    }
    Ok(payload::render(&fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_plain_host_port() -> Result<(), WeathersetError> {
        assert_eq!(
            "localhost:4567".parse::<TargetAddr>()?,
            TargetAddr {
                host: "localhost".into(),
                port: 4567,
                station_id: None,
            }
        );
        Ok(())
    }

    #[test]
    fn target_with_scheme_and_station() -> Result<(), WeathersetError> {
        assert_eq!(
            "http://weather.example.com:4567?id=IDS60901"
                .parse::<TargetAddr>()?,
            TargetAddr {
                host: "weather.example.com".into(),
                port: 4567,
                station_id: Some("IDS60901".into()),
            }
        );
        Ok(())
    }

    #[test]
    fn target_invalid_forms() {
        assert!("localhost".parse::<TargetAddr>().is_err());
        assert!(":4567".parse::<TargetAddr>().is_err());
        assert!("localhost:notaport".parse::<TargetAddr>().is_err());
        assert!("localhost:4567?station=IDS60901"
            .parse::<TargetAddr>()
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parse_full_response() -> Result<(), WeathersetError> {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 4\r\nLamport-Clock: 9\r\n\r\n[]\n!";
        let mut stream = &raw[..];
        assert_eq!(
            read_response(&mut stream).await?,
            Response {
                status: 200,
                lamport: Some(9),
                body: "[]\n!".into(),
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parse_headers_only_response() -> Result<(), WeathersetError> {
        let raw = b"HTTP/1.1 204 No Content\r\nLamport-Clock: 3\r\n\r\n";
        let mut stream = &raw[..];
        assert_eq!(
            read_response(&mut stream).await?,
            Response {
                status: 204,
                lamport: Some(3),
                body: String::new(),
            }
        );
        Ok(())
    }

    #[test]
    fn source_file_to_payload() -> Result<(), WeathersetError> {
        let path = format!(
            "/tmp/weatherset-test-source-{}.txt",
            std::process::id()
        );
        fs::write(&path, "id: IDS60901\nair_temp: 13.3\nnot a field\n")?;
        let payload = source_to_payload(Path::new(&path))?;
        assert_eq!(
            payload,
            "{\n    \"id\": \"IDS60901\",\n    \"air_temp\": \"13.3\"\n}"
        );
        Ok(())
    }

    #[test]
    fn source_file_without_fields_is_empty() -> Result<(), WeathersetError> {
        let path = format!(
            "/tmp/weatherset-test-source-empty-{}.txt",
            std::process::id()
        );
        fs::write(&path, "just prose, no pairs\n")?;
        assert_eq!(source_to_payload(Path::new(&path))?, "");
        Ok(())
    }
}
