//! TLS handshake recognition and parsing.
//!
//! Each recognizer matches a fixed byte pattern under a mask against the
//! first bytes of the flow, which reads through to the hello version so
//! unrelated traffic is unlikely to match. Parsers buffer until the whole
//! record-layer payload is present, then walk the handshake body with
//! [`ViewReader`] truncation helpers.

use super::{TlsCertificate, TlsCertificateChain, TlsClientHello, TlsServerHello, TlsVersion};
use crate::conntrack::conn_id::ConnectionId;
use crate::event::EventContent;
use crate::memory::{View, ViewReader};
use crate::protocols::stream::{AcceptDecision, ParseStatus};

use std::io::{Read, Seek, SeekFrom};

use anyhow::{anyhow, bail, Result};

/// Minimum bytes needed before a hello can be recognized: the record header
/// (5), the handshake header (4), and the hello version (2).
const MIN_HELLO_LEN: usize = 11;

/// handshake(1) + version(2) + length(2).
const RECORD_HEADER_LEN: usize = 5;

/// type(1) + length(3).
const HANDSHAKE_HEADER_LEN: usize = 4;

const RANDOM_LEN: usize = 32;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_ALPN: u16 = 0x0010;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;

/// DNS hostname entry type in the SNI extension (RFC 6066).
const SNI_TYPE_DNS: u8 = 0x00;

// Pattern and mask pairs matched against the first record bytes. Layout:
// record header (type, version, payload length), handshake header (type,
// length), hello version. Length fields are masked out.
const CLIENT_HELLO_PATTERN: [u8; 11] = [
    0x16, 0x03, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x03,
];
const CLIENT_HELLO_MASK: [u8; 11] = [
    0xff, 0xff, 0xff, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0xff, 0xff,
];

const SERVER_HELLO_PATTERN: [u8; 11] = [
    0x16, 0x03, 0x03, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x03,
];
const SERVER_HELLO_MASK: [u8; 11] = [
    0xff, 0xff, 0xff, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0xff, 0xff,
];

// A certificate record matches on the record type, the version major byte,
// and the handshake type (0x0b); the version minor byte varies.
const CERTIFICATE_PATTERN: [u8; 11] = [
    0x16, 0x03, 0x00, 0x00, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const CERTIFICATE_MASK: [u8; 11] = [
    0xff, 0xff, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Matches `input` against `pattern` under `mask`.
fn masked_match(input: &View, pattern: &[u8; 11], mask: &[u8; 11]) -> bool {
    for (idx, (expected, mask)) in pattern.iter().zip(mask.iter()).enumerate() {
        // Every bit set in the pattern must be covered by the mask.
        debug_assert_eq!(expected & !mask, 0);
        if input.get_byte(idx) & mask != *expected {
            return false;
        }
    }
    true
}

/// Recognizes TLS 1.2/1.3 Client Hello messages.
#[derive(Debug)]
pub struct TlsClientHelloFactory;

impl TlsClientHelloFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_HELLO_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }
        if masked_match(input, &CLIENT_HELLO_PATTERN, &CLIENT_HELLO_MASK) {
            (AcceptDecision::Accept, 0)
        } else {
            (AcceptDecision::Reject, input.len())
        }
    }
}

/// Recognizes TLS 1.2/1.3 Server Hello messages.
#[derive(Debug)]
pub struct TlsServerHelloFactory;

impl TlsServerHelloFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_HELLO_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }
        if masked_match(input, &SERVER_HELLO_PATTERN, &SERVER_HELLO_MASK) {
            (AcceptDecision::Accept, 0)
        } else {
            (AcceptDecision::Reject, input.len())
        }
    }
}

/// Recognizes TLS Certificate handshake messages.
#[derive(Debug)]
pub struct TlsCertificateFactory;

impl TlsCertificateFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_HELLO_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }
        if masked_match(input, &CERTIFICATE_PATTERN, &CERTIFICATE_MASK) {
            (AcceptDecision::Accept, 0)
        } else {
            (AcceptDecision::Reject, input.len())
        }
    }
}

/// Buffers a handshake record and returns its body once complete.
///
/// The fifth and sixth bytes of the record header give the payload length;
/// the returned view covers exactly the payload, and the second value is the
/// record's end offset in `all_input`.
fn complete_record(all_input: &View) -> Option<(View, usize)> {
    if all_input.len() < RECORD_HEADER_LEN {
        return None;
    }
    let payload_len = all_input.get_u16(RECORD_HEADER_LEN - 2) as usize;
    let record_end = RECORD_HEADER_LEN + payload_len;
    if all_input.len() < record_end {
        return None;
    }
    Some((all_input.sub_view(RECORD_HEADER_LEN, record_end), record_end))
}

/// Parses a single Client Hello, then leaves the rest of the flow alone.
#[derive(Debug)]
pub struct TlsClientHelloParser {
    connection_id: ConnectionId,
    all_input: View,
}

impl TlsClientHelloParser {
    pub(crate) fn new(connection_id: ConnectionId) -> TlsClientHelloParser {
        TlsClientHelloParser {
            connection_id,
            all_input: View::new(),
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.all_input.append(input);
        let (body, record_end) = match complete_record(&self.all_input) {
            Some(record) => record,
            None if is_end => bail!("incomplete TLS record for client hello"),
            None => return Ok(ParseStatus::needs_more(self.all_input.len())),
        };

        let hello = self.parse_hello(&body)?;
        let unused = self.all_input.sub_view(record_end, self.all_input.len());
        let consumed = self.all_input.len() - unused.len();
        Ok(ParseStatus::done(
            EventContent::TlsClientHello(Box::new(hello)),
            unused,
            consumed,
        ))
    }

    fn parse_hello(&self, body: &View) -> Result<TlsClientHello> {
        let mut reader = body.reader();
        reader.seek(SeekFrom::Current(HANDSHAKE_HEADER_LEN as i64))?;
        let version = TlsVersion(reader.read_u16()?);
        reader.seek(SeekFrom::Current(RANDOM_LEN as i64))?;

        // Session ID, a one-byte-length vector.
        reader.read_byte_then_seek()?;

        // Cipher suites: a two-byte length, then two-byte suite IDs.
        let (suites_len, mut suites) = reader.read_u16_then_truncate()?;
        let mut cipher_suites = Vec::with_capacity(suites_len as usize / 2);
        while let Ok(id) = suites.read_u16() {
            cipher_suites.push(id);
        }

        // Compression methods, a one-byte-length vector.
        reader.read_byte_then_seek()?;

        // Extensions, bounded by a two-byte length.
        let (_, mut extensions) = reader
            .read_u16_then_truncate()
            .map_err(|_| anyhow!("malformed TLS client hello"))?;

        let mut hello = TlsClientHello {
            connection_id: self.connection_id,
            version,
            cipher_suites,
            extension_types: vec![],
            server_name: None,
            alpn_protocols: vec![],
            supported_groups: vec![],
            ec_point_formats: vec![],
        };

        loop {
            let ext_type = match extensions.read_u16() {
                Ok(val) => val,
                // Out of extensions.
                Err(_) => break,
            };
            hello.extension_types.push(ext_type);
            let (_, mut ext_body) = extensions.read_u16_then_truncate()?;

            match ext_type {
                EXT_SERVER_NAME => {
                    if let Ok(name) = parse_sni(&mut ext_body) {
                        hello.server_name = Some(name);
                    }
                }
                EXT_ALPN => hello.alpn_protocols = parse_alpn_list(&mut ext_body),
                EXT_SUPPORTED_GROUPS => {
                    if let Ok((_, mut groups)) = ext_body.read_u16_then_truncate() {
                        while let Ok(id) = groups.read_u16() {
                            hello.supported_groups.push(id);
                        }
                    }
                }
                EXT_EC_POINT_FORMATS => {
                    if let Ok(count) = ext_body.read_byte() {
                        for _ in 0..count {
                            match ext_body.read_byte() {
                                Ok(fmt) => hello.ec_point_formats.push(fmt),
                                Err(_) => break,
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(hello)
    }
}

/// Renders a protocol string that should be UTF-8 but sometimes is not.
fn protocol_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => format!("<Invalid UTF-8: {}>", hex::encode(bytes)),
    }
}

/// Extracts the first DNS hostname from an SNI extension body.
fn parse_sni(reader: &mut ViewReader) -> Result<String> {
    // A two-byte list length bounds the server-name list.
    let (_, mut list) = reader.read_u16_then_truncate()?;
    loop {
        let entry_type = match list.read_byte() {
            Ok(val) => val,
            // Out of entries.
            Err(_) => break,
        };
        let name_len = list.read_u16()?;
        if entry_type == SNI_TYPE_DNS {
            let mut name = vec![0u8; name_len as usize];
            list.read_exact(&mut name)
                .map_err(|_| anyhow!("malformed SNI extension entry"))?;
            return Ok(protocol_string(&name));
        }
        list.seek(SeekFrom::Current(name_len as i64))?;
    }
    bail!("no DNS hostname in SNI extension")
}

/// Extracts the ordered protocol list from an ALPN extension body.
fn parse_alpn_list(reader: &mut ViewReader) -> Vec<String> {
    let mut protocols = vec![];
    // A two-byte length bounds the protocol list; each entry is a
    // one-byte-length string.
    let Ok((_, mut list)) = reader.read_u16_then_truncate() else {
        return protocols;
    };
    loop {
        let Ok(len) = list.read_byte() else {
            break;
        };
        let mut raw = vec![0u8; len as usize];
        if list.read_exact(&mut raw).is_err() {
            break;
        }
        protocols.push(protocol_string(&raw));
    }
    protocols
}

/// Parses a single Server Hello.
#[derive(Debug)]
pub struct TlsServerHelloParser {
    connection_id: ConnectionId,
    all_input: View,
}

impl TlsServerHelloParser {
    pub(crate) fn new(connection_id: ConnectionId) -> TlsServerHelloParser {
        TlsServerHelloParser {
            connection_id,
            all_input: View::new(),
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.all_input.append(input);
        let (body, record_end) = match complete_record(&self.all_input) {
            Some(record) => record,
            None if is_end => bail!("incomplete TLS record for server hello"),
            None => return Ok(ParseStatus::needs_more(self.all_input.len())),
        };

        let hello = self.parse_hello(&body)?;
        let unused = self.all_input.sub_view(record_end, self.all_input.len());
        let consumed = self.all_input.len() - unused.len();
        Ok(ParseStatus::done(
            EventContent::TlsServerHello(Box::new(hello)),
            unused,
            consumed,
        ))
    }

    fn parse_hello(&self, body: &View) -> Result<TlsServerHello> {
        let mut reader = body.reader();
        reader.seek(SeekFrom::Current(HANDSHAKE_HEADER_LEN as i64))?;
        let body_version = TlsVersion(reader.read_u16()?);
        reader.seek(SeekFrom::Current(RANDOM_LEN as i64))?;

        // Session ID, a one-byte-length vector.
        reader.read_byte_then_seek()?;

        let cipher_suite = reader.read_u16()?;
        let compression_method = reader.read_byte()?;

        // Extensions, bounded by a two-byte length.
        let (_, mut extensions) = reader
            .read_u16_then_truncate()
            .map_err(|_| anyhow!("malformed TLS server hello"))?;

        let mut extension_types = vec![];
        let mut selected_alpn = None;
        let mut selected_version = None;

        loop {
            let ext_type = match extensions.read_u16() {
                Ok(val) => val,
                // Out of extensions.
                Err(_) => break,
            };
            extension_types.push(ext_type);
            let (_, mut ext_body) = extensions.read_u16_then_truncate()?;

            match ext_type {
                EXT_SUPPORTED_VERSIONS => {
                    if let Ok(version) = ext_body.read_u16() {
                        selected_version = Some(TlsVersion(version));
                    }
                }
                EXT_ALPN => {
                    if let Some(protocol) = parse_alpn_list(&mut ext_body).into_iter().next() {
                        selected_alpn = Some(protocol);
                    }
                }
                _ => {}
            }
        }

        Ok(TlsServerHello {
            connection_id: self.connection_id,
            // TLS 1.3 hides the real version in supported_versions; earlier
            // versions state it in the hello body.
            version: selected_version.unwrap_or(body_version),
            cipher_suite,
            compression_method,
            extension_types,
            selected_alpn,
        })
    }
}

/// Parses a single Certificate handshake message.
#[derive(Debug)]
pub struct TlsCertificateParser {
    connection_id: ConnectionId,
    all_input: View,
}

impl TlsCertificateParser {
    pub(crate) fn new(connection_id: ConnectionId) -> TlsCertificateParser {
        TlsCertificateParser {
            connection_id,
            all_input: View::new(),
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.all_input.append(input);
        let (body, record_end) = match complete_record(&self.all_input) {
            Some(record) => record,
            None if is_end => bail!("incomplete TLS record for certificate message"),
            None => return Ok(ParseStatus::needs_more(self.all_input.len())),
        };

        let chain = self.parse_certificates(&body)?;
        let unused = self.all_input.sub_view(record_end, self.all_input.len());
        let consumed = self.all_input.len() - unused.len();
        Ok(ParseStatus::done(
            EventContent::TlsCertificateChain(Box::new(chain)),
            unused,
            consumed,
        ))
    }

    fn parse_certificates(&self, body: &View) -> Result<TlsCertificateChain> {
        let mut reader = body.reader();
        reader.seek(SeekFrom::Current(HANDSHAKE_HEADER_LEN as i64))?;

        // A three-byte length bounds the certificate list; each entry is a
        // three-byte length followed by a DER certificate.
        let (_, mut list) = reader
            .read_u24_then_truncate()
            .map_err(|_| anyhow!("malformed TLS certificate message"))?;

        let mut certificates = vec![];
        loop {
            let cert_len = match list.read_u24() {
                Ok(val) => val as usize,
                // Out of certificates.
                Err(_) => break,
            };
            let mut der = vec![0u8; cert_len];
            list.read_exact(&mut der)
                .map_err(|_| anyhow!("truncated certificate entry"))?;
            certificates.push(decode_certificate(der)?);
        }
        if certificates.is_empty() {
            bail!("empty TLS certificate list");
        }

        Ok(TlsCertificateChain {
            connection_id: self.connection_id,
            certificates,
        })
    }
}

/// Decodes one DER certificate into its identity fields.
fn decode_certificate(der: Vec<u8>) -> Result<TlsCertificate> {
    let (_, cert) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| anyhow!("error parsing certificate: {}", e))?;

    let subject = cert.subject().to_string();
    let issuer = cert.issuer().to_string();
    let mut dns_names = vec![];
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                dns_names.push((*dns).to_owned());
            }
        }
    }

    Ok(TlsCertificate {
        subject,
        issuer,
        dns_names,
        raw: der,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::stream::tls::TLS_V1_2;

    /// Appends `body` prefixed with its u16 length.
    fn with_u16_len(out: &mut Vec<u8>, body: &[u8]) {
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
    }

    /// Builds a Client Hello carrying SNI `example.com`, ALPN `h2` and
    /// `http/1.1`, supported groups, and EC point formats.
    fn client_hello_bytes() -> Vec<u8> {
        let mut extensions = vec![];

        // server_name: list of one DNS entry.
        let mut sni_entry = vec![SNI_TYPE_DNS];
        with_u16_len(&mut sni_entry, b"example.com");
        let mut sni_list = vec![];
        with_u16_len(&mut sni_list, &sni_entry);
        extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
        with_u16_len(&mut extensions, &sni_list);

        // alpn: length-prefixed protocol strings.
        let mut alpn_entries = vec![];
        for proto in [&b"h2"[..], &b"http/1.1"[..]] {
            alpn_entries.push(proto.len() as u8);
            alpn_entries.extend_from_slice(proto);
        }
        let mut alpn_list = vec![];
        with_u16_len(&mut alpn_list, &alpn_entries);
        extensions.extend_from_slice(&EXT_ALPN.to_be_bytes());
        with_u16_len(&mut extensions, &alpn_list);

        // supported groups: x25519 (0x001d), secp256r1 (0x0017).
        let mut groups_list = vec![];
        with_u16_len(&mut groups_list, &[0x00, 0x1d, 0x00, 0x17]);
        extensions.extend_from_slice(&EXT_SUPPORTED_GROUPS.to_be_bytes());
        with_u16_len(&mut extensions, &groups_list);

        // ec point formats: uncompressed.
        extensions.extend_from_slice(&EXT_EC_POINT_FORMATS.to_be_bytes());
        with_u16_len(&mut extensions, &[0x01, 0x00]);

        let mut hello = vec![];
        hello.extend_from_slice(&[0x03, 0x03]); // client version
        hello.extend_from_slice(&[0xab; 32]); // random
        hello.push(0); // empty session id
        with_u16_len(&mut hello, &[0x13, 0x01, 0x13, 0x02, 0xc0, 0x2f]); // cipher suites
        hello.extend_from_slice(&[0x01, 0x00]); // compression: null only
        with_u16_len(&mut hello, &extensions);

        let mut handshake = vec![0x01]; // client hello
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]); // u24 length
        handshake.extend_from_slice(&hello);

        let mut record = vec![0x16, 0x03, 0x01]; // handshake record, TLS 1.0
        with_u16_len(&mut record, &handshake);
        record
    }

    /// Builds a Server Hello selecting TLS 1.3 via supported_versions and
    /// ALPN `h2`.
    fn server_hello_bytes() -> Vec<u8> {
        let mut extensions = vec![];

        extensions.extend_from_slice(&EXT_SUPPORTED_VERSIONS.to_be_bytes());
        with_u16_len(&mut extensions, &[0x03, 0x04]);

        let mut alpn_entries = vec![2u8];
        alpn_entries.extend_from_slice(b"h2");
        let mut alpn_list = vec![];
        with_u16_len(&mut alpn_list, &alpn_entries);
        extensions.extend_from_slice(&EXT_ALPN.to_be_bytes());
        with_u16_len(&mut extensions, &alpn_list);

        let mut hello = vec![];
        hello.extend_from_slice(&[0x03, 0x03]); // server version
        hello.extend_from_slice(&[0xcd; 32]); // random
        hello.push(0); // empty session id
        hello.extend_from_slice(&[0x13, 0x01]); // cipher suite
        hello.push(0x00); // null compression
        with_u16_len(&mut hello, &extensions);

        let mut handshake = vec![0x02]; // server hello
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![0x16, 0x03, 0x03];
        with_u16_len(&mut record, &handshake);
        record
    }

    #[test]
    fn client_factory_matches_pattern() {
        let factory = TlsClientHelloFactory;
        let input = View::from(client_hello_bytes());
        assert_eq!(factory.accepts(&input), (AcceptDecision::Accept, 0));

        let input = View::from(server_hello_bytes());
        assert_eq!(factory.accepts(&input).0, AcceptDecision::Reject);

        let input = View::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert_eq!(factory.accepts(&input).0, AcceptDecision::Reject);

        let input = View::from(&client_hello_bytes()[..8]);
        assert_eq!(factory.accepts(&input).0, AcceptDecision::NeedMoreData);
    }

    #[test]
    fn server_factory_matches_pattern() {
        let factory = TlsServerHelloFactory;
        let input = View::from(server_hello_bytes());
        assert_eq!(factory.accepts(&input), (AcceptDecision::Accept, 0));

        let input = View::from(client_hello_bytes());
        assert_eq!(factory.accepts(&input).0, AcceptDecision::Reject);
    }

    #[test]
    fn parses_client_hello_fields() {
        let mut parser = TlsClientHelloParser::new(ConnectionId::new());
        let status = parser
            .parse(&View::from(client_hello_bytes()), false)
            .unwrap();
        let hello = match status.content {
            Some(EventContent::TlsClientHello(hello)) => hello,
            other => panic!("unexpected content: {other:?}"),
        };
        assert_eq!(hello.version, TLS_V1_2);
        assert_eq!(hello.server_name.as_deref(), Some("example.com"));
        assert_eq!(hello.alpn_protocols, vec!["h2", "http/1.1"]);
        assert_eq!(hello.cipher_suites, vec![0x1301, 0x1302, 0xc02f]);
        assert_eq!(hello.supported_groups, vec![0x001d, 0x0017]);
        assert_eq!(hello.ec_point_formats, vec![0x00]);
        assert_eq!(
            hello.extension_types,
            vec![
                EXT_SERVER_NAME,
                EXT_ALPN,
                EXT_SUPPORTED_GROUPS,
                EXT_EC_POINT_FORMATS
            ]
        );
        assert!(status.unused.is_empty());
    }

    #[test]
    fn client_hello_defragments_across_deliveries() {
        let raw = client_hello_bytes();
        for split in [1, 4, 11, raw.len() - 1] {
            let mut parser = TlsClientHelloParser::new(ConnectionId::new());
            let status = parser.parse(&View::from(&raw[..split]), false).unwrap();
            assert!(status.content.is_none(), "completed early at {split}");
            let status = parser.parse(&View::from(&raw[split..]), false).unwrap();
            match status.content {
                Some(EventContent::TlsClientHello(hello)) => {
                    assert_eq!(hello.server_name.as_deref(), Some("example.com"));
                }
                other => panic!("unexpected content: {other:?}"),
            }
        }
    }

    #[test]
    fn trailing_bytes_are_returned_unused() {
        let mut raw = client_hello_bytes();
        raw.extend_from_slice(b"NEXTRECORD");
        let mut parser = TlsClientHelloParser::new(ConnectionId::new());
        let status = parser.parse(&View::from(raw), false).unwrap();
        assert!(status.content.is_some());
        assert_eq!(status.unused.to_vec(), b"NEXTRECORD");
    }

    #[test]
    fn incomplete_record_errors_at_end() {
        let raw = client_hello_bytes();
        let mut parser = TlsClientHelloParser::new(ConnectionId::new());
        parser.parse(&View::from(&raw[..10]), false).unwrap();
        assert!(parser.parse(&View::new(), true).is_err());
    }

    #[test]
    fn parses_server_hello_fields() {
        let mut parser = TlsServerHelloParser::new(ConnectionId::new());
        let status = parser
            .parse(&View::from(server_hello_bytes()), false)
            .unwrap();
        let hello = match status.content {
            Some(EventContent::TlsServerHello(hello)) => hello,
            other => panic!("unexpected content: {other:?}"),
        };
        assert_eq!(hello.version.0, 0x0304);
        assert_eq!(hello.version.name(), "TLSv1.3");
        assert_eq!(hello.cipher_suite, 0x1301);
        assert_eq!(hello.compression_method, 0);
        assert_eq!(hello.selected_alpn.as_deref(), Some("h2"));
        assert_eq!(
            hello.extension_types,
            vec![EXT_SUPPORTED_VERSIONS, EXT_ALPN]
        );
    }

    #[test]
    fn server_hello_version_falls_back_to_body() {
        // Strip the extensions down to ALPN only; the version must come from
        // the hello body.
        let mut extensions = vec![];
        let mut alpn_entries = vec![8u8];
        alpn_entries.extend_from_slice(b"http/1.1");
        let mut alpn_list = vec![];
        with_u16_len(&mut alpn_list, &alpn_entries);
        extensions.extend_from_slice(&EXT_ALPN.to_be_bytes());
        with_u16_len(&mut extensions, &alpn_list);

        let mut hello = vec![];
        hello.extend_from_slice(&[0x03, 0x03]);
        hello.extend_from_slice(&[0xcd; 32]);
        hello.push(0);
        hello.extend_from_slice(&[0xc0, 0x2f]);
        hello.push(0x00);
        with_u16_len(&mut hello, &extensions);

        let mut handshake = vec![0x02];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);
        let mut record = vec![0x16, 0x03, 0x03];
        with_u16_len(&mut record, &handshake);

        let mut parser = TlsServerHelloParser::new(ConnectionId::new());
        let status = parser.parse(&View::from(record), false).unwrap();
        match status.content {
            Some(EventContent::TlsServerHello(hello)) => {
                assert_eq!(hello.version, TLS_V1_2);
                assert_eq!(hello.selected_alpn.as_deref(), Some("http/1.1"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn certificate_factory_matches_any_record_version_minor() {
        let factory = TlsCertificateFactory;
        for minor in [0x01u8, 0x03] {
            let input = View::from(
                &[
                    0x16, 0x03, minor, 0x00, 0x40, 0x0b, 0x00, 0x00, 0x3c, 0x00, 0x00,
                ][..],
            );
            assert_eq!(
                factory.accepts(&input),
                (AcceptDecision::Accept, 0),
                "minor {minor}"
            );
        }

        let input = View::from(client_hello_bytes());
        assert_eq!(factory.accepts(&input).0, AcceptDecision::Reject);
    }

    #[test]
    fn malformed_certificate_list_is_an_error() {
        // A certificate record whose list length runs past the record.
        let mut handshake = vec![0x0b];
        handshake.extend_from_slice(&[0x00, 0x00, 0x10]); // message length
        handshake.extend_from_slice(&[0x00, 0x00, 0x40]); // oversized list length
        handshake.extend_from_slice(&[0u8; 13]);
        let mut record = vec![0x16, 0x03, 0x03];
        with_u16_len(&mut record, &handshake);

        let mut parser = TlsCertificateParser::new(ConnectionId::new());
        assert!(parser.parse(&View::from(record), false).is_err());
    }
}
