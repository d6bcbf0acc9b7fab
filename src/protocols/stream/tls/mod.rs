//! TLS handshake message types.
//!
//! The recognizers extract plaintext handshake parameters only: Client and
//! Server Hello fields and the server certificate chain. Nothing here
//! decrypts traffic.

pub mod parser;

use crate::conntrack::conn_id::ConnectionId;

use std::fmt;

use serde::Serialize;

/// A TLS protocol version as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TlsVersion(pub u16);

pub const TLS_V1_0: TlsVersion = TlsVersion(0x0301);
pub const TLS_V1_2: TlsVersion = TlsVersion(0x0303);
pub const TLS_V1_3: TlsVersion = TlsVersion(0x0304);

impl TlsVersion {
    pub fn name(&self) -> &'static str {
        match self.0 {
            0x0300 => "SSLv3",
            0x0301 => "TLSv1.0",
            0x0302 => "TLSv1.1",
            0x0303 => "TLSv1.2",
            0x0304 => "TLSv1.3",
            _ => "unknown",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters extracted from a TLS 1.2/1.3 Client Hello.
#[derive(Debug, Clone, Serialize)]
pub struct TlsClientHello {
    /// Connection the hello was observed on.
    pub connection_id: ConnectionId,
    /// Protocol version from the hello body.
    pub version: TlsVersion,
    /// Offered cipher suite IDs in client preference order.
    pub cipher_suites: Vec<u16>,
    /// Extension type IDs in wire order.
    pub extension_types: Vec<u16>,
    /// Hostname from the first DNS-type SNI entry, if any.
    pub server_name: Option<String>,
    /// Protocols offered in the ALPN extension, in order.
    pub alpn_protocols: Vec<String>,
    /// Curve IDs from the supported-groups extension.
    pub supported_groups: Vec<u16>,
    /// Point formats from the EC point formats extension.
    pub ec_point_formats: Vec<u8>,
}

/// Parameters extracted from a TLS 1.2/1.3 Server Hello.
#[derive(Debug, Clone, Serialize)]
pub struct TlsServerHello {
    /// Connection the hello was observed on.
    pub connection_id: ConnectionId,
    /// The negotiated version: the `supported_versions` selection when
    /// present (TLS 1.3), the hello body version otherwise.
    pub version: TlsVersion,
    /// The selected cipher suite.
    pub cipher_suite: u16,
    /// The selected compression method.
    pub compression_method: u8,
    /// Extension type IDs in wire order.
    pub extension_types: Vec<u16>,
    /// The protocol selected in the ALPN extension, if any.
    pub selected_alpn: Option<String>,
}

/// One certificate from a TLS Certificate handshake message.
#[derive(Debug, Clone, Serialize)]
pub struct TlsCertificate {
    /// DER bytes as they appeared on the wire.
    pub raw: Vec<u8>,
    /// X.509 subject, rendered.
    pub subject: String,
    /// X.509 issuer, rendered.
    pub issuer: String,
    /// DNS names from the subject-alternative-name extension.
    pub dns_names: Vec<String>,
}

/// The certificate chain from a TLS Certificate handshake message. The
/// server's certificate is encrypted in TLS 1.3, so chains are only observed
/// on TLS 1.2 and earlier connections.
#[derive(Debug, Clone, Serialize)]
pub struct TlsCertificateChain {
    /// Connection the message was observed on.
    pub connection_id: ConnectionId,
    /// Certificates in wire order; the entity certificate comes first.
    pub certificates: Vec<TlsCertificate>,
}
