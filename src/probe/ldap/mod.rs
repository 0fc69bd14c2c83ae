//! LDAP directory probe: raw port reachability and a one-level search over
//! plain LDAP and LDAPS.

pub mod proto;

use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::{Duration, Instant};

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use strum_macros::{AsRefStr, Display, EnumString};

use self::proto::{
    bind_request, decode_message, read_frame, search_request, unbind_request, Filter, ProtocolOp,
    SearchRequest, RESULT_SIZE_LIMIT_EXCEEDED, RESULT_SUCCESS,
};
use super::elapsed_ms;
use crate::config::LdapConfig;
use crate::error::ProbeError;
use crate::record::{CheckRecord, CheckType};

const BIND_ID: i64 = 1;
const SEARCH_ID: i64 = 2;
const UNBIND_ID: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    Ldap,
    Ldaps,
}

/// Result of a completed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { first_dn: String, entries: usize },
    Empty,
}

impl SearchOutcome {
    pub fn note(&self) -> &'static str {
        match self {
            SearchOutcome::Found { .. } => "found",
            SearchOutcome::Empty => "empty",
        }
    }
}

pub struct LdapProbe {
    config: LdapConfig,
    filter: Filter,
    timeout: Duration,
}

impl LdapProbe {
    pub fn new(config: LdapConfig, timeout: Duration) -> Result<Self, ProbeError> {
        let filter =
            Filter::parse(&config.filter).map_err(|reason| ProbeError::Protocol { reason })?;
        Ok(LdapProbe {
            config,
            filter,
            timeout,
        })
    }

    /// Port checks for every configured port, then one search per transport.
    pub fn run(&self) -> Vec<CheckRecord> {
        let mut records: Vec<CheckRecord> = self
            .config
            .ports
            .iter()
            .map(|port| self.check_port(*port))
            .collect();
        for transport in &self.config.transports {
            match Transport::from_str(transport) {
                Ok(transport) => records.push(self.check_search(transport)),
                Err(_) => {
                    tracing::warn!(transport = %transport, "ignoring unknown LDAP transport")
                }
            }
        }
        records
    }

    /// Raw TCP connect to `host:port`.
    pub fn check_port(&self, port: u16) -> CheckRecord {
        let target = format!("{}:{}", self.config.host, port);
        tracing::info!(endpoint = %target, "checking port");
        let record = CheckRecord::new(CheckType::LdapPort, &target).code(port);
        let start = Instant::now();
        match connect(&self.config.host, port, Instant::now() + self.timeout) {
            Ok(_) => {
                let ms = elapsed_ms(start);
                tracing::info!(endpoint = %target, ms, "port open");
                record.ok().duration_ms(ms)
            }
            Err(e) => {
                let ms = elapsed_ms(start);
                tracing::warn!(endpoint = %target, error = %e, ms, "port closed");
                record.duration_ms(ms).note(e.note())
            }
        }
    }

    /// Anonymous bind plus one-level search over `transport`.
    pub fn check_search(&self, transport: Transport) -> CheckRecord {
        let port = match transport {
            Transport::Ldap => self.config.ldap_port,
            Transport::Ldaps => self.config.ldaps_port,
        };
        let target = format!("{}://{}", transport, self.config.host);
        tracing::info!(endpoint = %target, base = %self.config.base_dn, "checking LDAP search");
        let record = CheckRecord::new(CheckType::LdapSearch, &target).code(port);

        let start = Instant::now();
        let outcome = self.search_over(transport, port);
        let ms = elapsed_ms(start);
        match outcome {
            Ok(outcome) => {
                match &outcome {
                    SearchOutcome::Found { first_dn, entries } => tracing::info!(
                        endpoint = %target,
                        dn = %first_dn,
                        entries,
                        ms,
                        "entry found"
                    ),
                    SearchOutcome::Empty => tracing::warn!(
                        endpoint = %target,
                        ms,
                        "response received, but no entries found"
                    ),
                }
                record.ok().duration_ms(ms).note(outcome.note())
            }
            Err(e) => {
                tracing::warn!(endpoint = %target, error = %e, ms, "LDAP search failed");
                record.duration_ms(ms).note("error")
            }
        }
    }

    fn search_over(&self, transport: Transport, port: u16) -> Result<SearchOutcome, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let tcp = connect(&self.config.host, port, deadline)?;
        let socket = Bounded::new(tcp, deadline);
        let request = SearchRequest {
            base_dn: &self.config.base_dn,
            filter: &self.filter,
            attributes: &self.config.attributes,
            size_limit: 0,
            time_limit: self.timeout.as_secs() as i64,
        };

        match transport {
            Transport::Ldap => {
                let mut stream = socket;
                search(&mut stream, &request, deadline)
            }
            Transport::Ldaps => {
                let mut stream = tls_connect(&self.config.host, socket)?;
                let outcome = search(&mut stream, &request, deadline);
                let _ = stream.shutdown();
                outcome
            }
        }
    }
}

/// Connects to the first reachable address of `host:port`. All attempts share
/// one `deadline`.
fn connect(host: &str, port: u16, deadline: Instant) -> Result<TcpStream, ProbeError> {
    let addresses: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| ProbeError::DnsResolution {
            hostname: host.to_string(),
            source,
        })?
        .collect();
    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for address in &addresses {
        let left = match remaining(deadline) {
            Ok(left) => left,
            Err(e) => {
                last_error = e;
                break;
            }
        };
        match TcpStream::connect_timeout(address, left) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }
    if matches!(
        last_error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    ) {
        return Err(ProbeError::Timeout {
            operation: format!("connect to {}:{}", host, port),
        });
    }
    Err(ProbeError::ConnectionFailed {
        address: format!("{}:{}", host, port),
        source: last_error,
    })
}

/// Time left until `deadline`, or `TimedOut` once it has passed.
fn remaining(deadline: Instant) -> io::Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "LDAP time limit reached"));
    }
    Ok(left)
}

/// Socket whose every read and write waits at most until one shared deadline.
///
/// A socket timeout alone restarts on each call, so a server trickling bytes
/// could hold the search open indefinitely.
#[derive(Debug)]
pub struct Bounded {
    socket: TcpStream,
    deadline: Instant,
}

impl Bounded {
    pub fn new(socket: TcpStream, deadline: Instant) -> Self {
        Bounded { socket, deadline }
    }
}

impl Read for Bounded {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.set_read_timeout(Some(remaining(self.deadline)?))?;
        self.socket.read(buf)
    }
}

impl Write for Bounded {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.set_write_timeout(Some(remaining(self.deadline)?))?;
        self.socket.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.socket.flush()
    }
}

/// TLS without certificate or hostname verification.
fn tls_connect(
    host: &str,
    socket: Bounded,
) -> Result<openssl::ssl::SslStream<Bounded>, ProbeError> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    let stream = connector
        .configure()?
        .verify_hostname(false)
        .use_server_name_indication(host.parse::<IpAddr>().is_err())
        .connect(host, socket)?;
    Ok(stream)
}

/// Runs bind, search and unbind over an established stream.
pub fn search<S: Read + Write>(
    stream: &mut S,
    request: &SearchRequest<'_>,
    deadline: Instant,
) -> Result<SearchOutcome, ProbeError> {
    stream.write_all(&bind_request(BIND_ID))?;
    stream.flush()?;
    loop {
        let message = next_message(stream, deadline)?;
        if message.id != BIND_ID {
            continue;
        }
        match message.op {
            ProtocolOp::BindResponse(result) if result.is_success() => break,
            ProtocolOp::BindResponse(result) => {
                return Err(ProbeError::Protocol {
                    reason: format!("bind failed with code {}: {}", result.code, result.diagnostic),
                })
            }
            other => {
                return Err(ProbeError::Protocol {
                    reason: format!("unexpected reply to bind: {:?}", other),
                })
            }
        }
    }

    stream.write_all(&search_request(SEARCH_ID, request))?;
    stream.flush()?;
    let mut first_dn: Option<String> = None;
    let mut entries = 0;
    let done = loop {
        let message = next_message(stream, deadline)?;
        if message.id != SEARCH_ID {
            continue;
        }
        match message.op {
            ProtocolOp::SearchEntry { dn } if !dn.is_empty() => {
                entries += 1;
                first_dn.get_or_insert(dn);
            }
            ProtocolOp::SearchDone(result) => break result,
            _ => {}
        }
    };

    // best effort, the server closes the connection on unbind
    let _ = stream.write_all(&unbind_request(UNBIND_ID));

    if done.code != RESULT_SUCCESS && done.code != RESULT_SIZE_LIMIT_EXCEEDED {
        return Err(ProbeError::Protocol {
            reason: format!("search failed with code {}: {}", done.code, done.diagnostic),
        });
    }
    Ok(match first_dn {
        Some(first_dn) => SearchOutcome::Found { first_dn, entries },
        None => SearchOutcome::Empty,
    })
}

fn next_message<S: Read>(
    stream: &mut S,
    deadline: Instant,
) -> Result<proto::LdapMessage, ProbeError> {
    if Instant::now() >= deadline {
        return Err(ProbeError::Timeout {
            operation: "LDAP response".to_string(),
        });
    }
    let frame = read_frame(stream).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeError::Timeout {
            operation: "LDAP response".to_string(),
        },
        io::ErrorKind::InvalidData => ProbeError::Protocol {
            reason: e.to_string(),
        },
        _ => ProbeError::IoError { source: e },
    })?;
    decode_message(&frame).map_err(|reason| ProbeError::Protocol { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays canned server bytes and records what the client wrote.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Scripted {
        fn new(responses: &[&[u8]]) -> Self {
            Scripted {
                input: Cursor::new(responses.concat()),
                written: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const BIND_OK: &[u8] = &[
        0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00,
    ];
    const BIND_REFUSED: &[u8] = &[
        0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x31, 0x04, 0x00, 0x04, 0x00,
    ];
    const ENTRY: &[u8] = &[
        0x30, 0x14, 0x02, 0x01, 0x02, 0x64, 0x0f, 0x04, 0x09, b'c', b'n', b'=', b'E', b'E',
        b',', b'd', b'c', b'=', 0x30, 0x02, 0x30, 0x00,
    ];
    const DONE_OK: &[u8] = &[
        0x30, 0x0c, 0x02, 0x01, 0x02, 0x65, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00,
    ];
    const DONE_NO_SUCH_OBJECT: &[u8] = &[
        0x30, 0x0c, 0x02, 0x01, 0x02, 0x65, 0x07, 0x0a, 0x01, 0x20, 0x04, 0x00, 0x04, 0x00,
    ];

    fn run(responses: &[&[u8]]) -> (Result<SearchOutcome, ProbeError>, Vec<u8>) {
        let filter = Filter::Present("objectClass".to_string());
        let attributes = vec!["cn".to_string()];
        let request = SearchRequest {
            base_dn: "dc=example",
            filter: &filter,
            attributes: &attributes,
            size_limit: 0,
            time_limit: 10,
        };
        let mut stream = Scripted::new(responses);
        let outcome = search(
            &mut stream,
            &request,
            Instant::now() + Duration::from_secs(5),
        );
        (outcome, stream.written)
    }

    #[test]
    fn test_search_found() {
        let (outcome, written) = run(&[BIND_OK, ENTRY, ENTRY, DONE_OK]);
        assert_eq!(
            outcome.unwrap(),
            SearchOutcome::Found {
                first_dn: "cn=EE,dc=".to_string(),
                entries: 2
            }
        );
        assert!(written.starts_with(&bind_request(BIND_ID)));
        assert!(written.ends_with(&unbind_request(UNBIND_ID)));
    }

    #[test]
    fn test_search_empty_is_not_a_failure() {
        let (outcome, _) = run(&[BIND_OK, DONE_OK]);
        let outcome = outcome.unwrap();
        assert_eq!(outcome, SearchOutcome::Empty);
        assert_eq!(outcome.note(), "empty");
    }

    #[test]
    fn test_search_error_code() {
        let (outcome, _) = run(&[BIND_OK, DONE_NO_SUCH_OBJECT]);
        assert!(matches!(outcome, Err(ProbeError::Protocol { .. })));
    }

    #[test]
    fn test_bind_refused() {
        let (outcome, written) = run(&[BIND_REFUSED]);
        let err = outcome.unwrap_err();
        assert!(err.to_string().contains("bind failed with code 49"));
        // nothing beyond the bind request was sent
        assert_eq!(written, bind_request(BIND_ID));
    }

    #[test]
    fn test_connection_closed_mid_search() {
        let (outcome, _) = run(&[BIND_OK, ENTRY]);
        assert!(matches!(outcome, Err(ProbeError::IoError { .. })));
    }

    #[test]
    fn test_bounded_socket_stops_at_deadline() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let socket = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _peer = listener.accept().unwrap();

        let start = Instant::now();
        let mut bounded = Bounded::new(socket, start + Duration::from_millis(300));
        let mut buf = [0u8; 1];
        // the peer never writes
        let err = bounded.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));
        assert!(start.elapsed() < Duration::from_secs(2));

        // once the deadline has passed nothing blocks at all
        let err = bounded.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(
            bounded.write(b"x").unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
    }

    #[test]
    fn test_connect_after_deadline_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = connect("127.0.0.1", port, Instant::now()).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
    }

    #[test]
    fn test_transport_names() {
        assert_eq!(Transport::Ldaps.to_string(), "ldaps");
        assert_eq!(Transport::from_str("ldap").unwrap(), Transport::Ldap);
    }
}
