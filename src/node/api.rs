//! Aggregation node wire-protocol handling: the per-connection request
//! coordinator.
//!
//! The protocol is line-oriented HTTP-flavored text. Every connection
//! carries exactly one request: request line, header lines up to a blank
//! line, then (for PUT) a fixed-length body. Parsing failures map to status
//! codes through explicit error kinds; a failing connection still gets its
//! socket closed.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::node::payload;
use crate::node::store::{now_ms, WeatherRecord};
use crate::node::AggregationContext;
use crate::utils::WeathersetError;

use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
    AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;

/// Status codes used on the wire.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum StatusCode {
    Ok,
    Created,
    NoContent,
    BadRequest,
    NotFound,
    InternalError,
}

impl StatusCode {
    /// Full response status line for this code.
    fn line(self) -> &'static str {
        match self {
            Self::Ok => "HTTP/1.1 200 OK",
            Self::Created => "HTTP/1.1 201 Created",
            Self::NoContent => "HTTP/1.1 204 No Content",
            Self::BadRequest => "HTTP/1.1 400 Bad Request",
            Self::NotFound => "HTTP/1.1 404 Not Found",
            Self::InternalError => "HTTP/1.1 500 Internal Server Error",
        }
    }
}

/// Parsed request line.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) enum Request {
    /// Station record upload.
    Put,

    /// Record query, for one station if an ID was given in the path.
    Get { station_id: Option<String> },
}

/// Parses the request line into a dispatchable request. Unsupported methods
/// and malformed lines are protocol errors (400 upstream).
pub(crate) fn parse_request_line(
    line: &str,
) -> Result<Request, WeathersetError> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| WeathersetError::msg("empty request line"))?;
    let path = parts.next().unwrap_or("");

    if method.eq_ignore_ascii_case("PUT") {
        Ok(Request::Put)
    } else if method.eq_ignore_ascii_case("GET") {
        let station_id = path
            .split_once("?id=")
            .map(|(_, id)| id.to_string());
        Ok(Request::Get { station_id })
    } else {
        Err(WeathersetError::msg(format!(
            "unsupported method '{}'",
            method
        )))
    }
}

/// Recognized request headers.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
struct Headers {
    /// `Content-Length` value; zero when absent.
    content_length: usize,

    /// Last `Lamport-Clock` value seen; `None` when the header was absent.
    lamport: Option<i64>,
}

/// Reads header lines up to the blank-line terminator. Each `Lamport-Clock`
/// header seen is immediately merged into the node clock under the clock
/// lock. Returns the status to respond with on failure: connection close
/// before the blank line or a bad clock value is an internal error, an
/// unparsable `Content-Length` a protocol error.
async fn read_headers<R>(
    reader: &mut R,
    ctx: &AggregationContext,
) -> Result<Headers, StatusCode>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Headers::default();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return Err(StatusCode::InternalError),
            Ok(_) => {}
        }

        let line = line.trim();
        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix("Content-Length:") {
            headers.content_length =
                value.trim().parse().map_err(|_| StatusCode::BadRequest)?;
        } else if let Some(value) = line.strip_prefix("Lamport-Clock:") {
            let received: i64 = value
                .trim()
                .parse()
                .map_err(|_| StatusCode::InternalError)?;
            {
                let mut clock = ctx.clock.lock().await;
                clock
                    .sync(received)
                    .map_err(|_| StatusCode::InternalError)?;
            }
            headers.lamport = Some(received);
        }
    }

    Ok(headers)
}

/// Serves exactly one request on an accepted connection, then closes it.
pub(crate) async fn serve_connection(
    ctx: Arc<AggregationContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    if let Err(e) = handle_request(&ctx, &mut stream).await {
        pf_warn!("error serving request from '{}': {}", peer, e);
    }
    if let Err(e) = stream.shutdown().await {
        pf_debug!("error closing connection from '{}': {}", peer, e);
    }
}

/// Runs the request state machine on one connection: request line, headers,
/// method handler, response.
pub(crate) async fn handle_request<S>(
    ctx: &AggregationContext,
    conn: S,
) -> Result<(), WeathersetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = io::split(conn);
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() || line.trim().is_empty() {
        return respond_status(&mut writer, StatusCode::BadRequest).await;
    }

    match parse_request_line(line.trim()) {
        Ok(Request::Put) => handle_put(ctx, &mut reader, &mut writer).await,
        Ok(Request::Get { station_id }) => {
            handle_get(ctx, &mut reader, &mut writer, station_id).await
        }
        Err(e) => {
            pf_debug!("rejecting request: {}", e);
            respond_status(&mut writer, StatusCode::BadRequest).await
        }
    }
}

/// PUT handler: accepts or updates one station record, persists the store,
/// and reports the advanced clock.
async fn handle_put<R, W>(
    ctx: &AggregationContext,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), WeathersetError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let headers = match read_headers(reader, ctx).await {
        Ok(headers) => headers,
        Err(status) => return respond_status(writer, status).await,
    };

    // an empty body is a no-op heartbeat: advance the clock, touch nothing
    if headers.content_length == 0 {
        let mut clock = ctx.clock.lock().await;
        clock.increment();
        return respond_lamport(writer, StatusCode::NoContent, clock.current())
            .await;
    }

    if headers.lamport.is_none() {
        return respond_status(writer, StatusCode::InternalError).await;
    }

    let mut body = vec![0u8; headers.content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return respond_status(writer, StatusCode::InternalError).await;
    }
    let body = match String::from_utf8(body) {
        Ok(body) => body,
        Err(_) => {
            return respond_status(writer, StatusCode::InternalError).await
        }
    };

    let id = match payload::extract_id(&body) {
        Ok(id) => id,
        Err(e) => {
            pf_debug!("rejecting PUT body: {}", e);
            return respond_status(writer, StatusCode::InternalError).await;
        }
    };

    // the record's stamp is the clock value merged from the sender, read
    // before the pre-response increment
    let stamp = { ctx.clock.lock().await.current() };
    let is_new = ctx.store.put(
        id.clone(),
        WeatherRecord {
            payload: body,
            lamport: stamp,
            last_update: now_ms(),
        },
    );
    ctx.backup.save(&ctx.store).await;
    pf_info!(
        "{} station '{}' at lamport {}",
        if is_new { "created" } else { "updated" },
        id,
        stamp
    );

    let mut clock = ctx.clock.lock().await;
    clock.increment();
    let status = if is_new {
        StatusCode::Created
    } else {
        StatusCode::Ok
    };
    respond_lamport(writer, status, clock.current()).await
}

/// GET handler: returns one station's payload, or an array rendering of all
/// current payloads when no station ID was given.
async fn handle_get<R, W>(
    ctx: &AggregationContext,
    reader: &mut R,
    writer: &mut W,
    station_id: Option<String>,
) -> Result<(), WeathersetError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let headers = match read_headers(reader, ctx).await {
        Ok(headers) => headers,
        Err(status) => return respond_status(writer, status).await,
    };
    if headers.lamport.is_none() {
        return respond_status(writer, StatusCode::InternalError).await;
    }

    let body = if let Some(id) = station_id {
        match ctx.store.get(&id) {
            Some(record) => record.payload,
            None => return respond_status(writer, StatusCode::NotFound).await,
        }
    } else if !ctx.store.is_empty() {
        let rendered: Vec<String> = ctx
            .store
            .snapshot()
            .into_iter()
            .map(|(_, record)| payload::indent(&record.payload))
            .collect();
        format!("[\n{}\n]\n", rendered.join(",\n"))
    } else {
        "[]\n".into()
    };

    let mut clock = ctx.clock.lock().await;
    clock.increment();
    respond_body(writer, StatusCode::Ok, clock.current(), &body).await
}

/// Writes a bare status-line response.
async fn respond_status<W>(
    writer: &mut W,
    status: StatusCode,
) -> Result<(), WeathersetError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{}\r\n\r\n", status.line()).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a bodyless response carrying the node's clock value.
async fn respond_lamport<W>(
    writer: &mut W,
    status: StatusCode,
    lamport: i64,
) -> Result<(), WeathersetError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(
            format!("{}\r\nLamport-Clock: {}\r\n\r\n", status.line(), lamport)
                .as_bytes(),
        )
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Writes a full response with JSON body.
async fn respond_body<W>(
    writer: &mut W,
    status: StatusCode,
    lamport: i64,
    body: &str,
) -> Result<(), WeathersetError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(
            format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nLamport-Clock: {}\r\n\r\n{}",
                status.line(),
                body.len(),
                lamport,
                body
            )
            .as_bytes(),
        )
        .await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AggregationConfig;

    fn test_context(name: &str) -> Arc<AggregationContext> {
        let config = AggregationConfig {
            backup_path: format!(
                "/tmp/weatherset-test-api-{}-{}.bak",
                name,
                std::process::id()
            ),
            ..Default::default()
        };
        Arc::new(AggregationContext::new(config))
    }

    /// Feeds one raw request through the coordinator and returns the raw
    /// response text.
    async fn roundtrip(ctx: &AggregationContext, raw: &str) -> String {
        let (client, server) = io::duplex(64 * 1024);
        let (mut client_read, mut client_write) = io::split(client);

        client_write.write_all(raw.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        handle_request(ctx, server).await.unwrap();

        let mut response = String::new();
        client_read.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn request_line_dispatch() -> Result<(), WeathersetError> {
        assert_eq!(
            parse_request_line("PUT /weather.json HTTP/1.1")?,
            Request::Put
        );
        assert_eq!(
            parse_request_line("GET /weather.json HTTP/1.1")?,
            Request::Get { station_id: None }
        );
        assert_eq!(
            parse_request_line("GET /weather.json?id=IDS60901 HTTP/1.1")?,
            Request::Get {
                station_id: Some("IDS60901".into())
            }
        );
        assert!(parse_request_line("DELETE /weather.json HTTP/1.1").is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_missing_clock_rejected() {
        let ctx = test_context("put-no-clock");
        let body = "{\n    \"id\": \"IDS60901\"\n}";
        let raw = format!(
            "PUT /weather.json HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let response = roundtrip(&ctx, &raw).await;
        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(ctx.store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_empty_body_no_content() {
        let ctx = test_context("put-empty");
        let raw =
            "PUT /weather.json HTTP/1.1\r\nContent-Length: 0\r\nLamport-Clock: 1\r\n\r\n";
        let response = roundtrip(&ctx, raw).await;
        assert!(response.starts_with("HTTP/1.1 204"));
        assert!(response.contains("Lamport-Clock:"));
        assert!(ctx.store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_new_then_update() {
        let ctx = test_context("put-twice");
        let body = "{\n    \"id\": \"IDS60901\",\n    \"air_temp\": \"13.3\"\n}";
        let raw = format!(
            "PUT /weather.json HTTP/1.1\r\nContent-Length: {}\r\nLamport-Clock: 1\r\n\r\n{}",
            body.len(),
            body
        );

        let response = roundtrip(&ctx, &raw).await;
        assert!(response.starts_with("HTTP/1.1 201"));
        assert_eq!(ctx.store.len(), 1);

        let response = roundtrip(&ctx, &raw).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert_eq!(ctx.store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_empty_store_is_empty_array() {
        let ctx = test_context("get-empty");
        let raw = "GET /weather.json HTTP/1.1\r\nLamport-Clock: 1\r\n\r\n";
        let response = roundtrip(&ctx, raw).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("[]\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_unknown_station_not_found() {
        let ctx = test_context("get-404");
        let raw =
            "GET /weather.json?id=zzz HTTP/1.1\r\nLamport-Clock: 1\r\n\r\n";
        let response = roundtrip(&ctx, raw).await;
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_request_line_bad_request() {
        let ctx = test_context("bad-request");
        let response = roundtrip(&ctx, "\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reply_clock_exceeds_synced_value() {
        let ctx = test_context("clock-advance");
        let body = "{\n    \"id\": \"IDS60901\"\n}";
        let raw = format!(
            "PUT /weather.json HTTP/1.1\r\nContent-Length: {}\r\nLamport-Clock: 41\r\n\r\n{}",
            body.len(),
            body
        );
        let response = roundtrip(&ctx, &raw).await;
        let reported: i64 = response
            .lines()
            .find_map(|l| l.strip_prefix("Lamport-Clock:"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(reported > 41);
        assert_eq!(ctx.store.get("IDS60901").unwrap().lamport, 42);
    }
}
