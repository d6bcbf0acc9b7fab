//! Configuration options.
//!
//! [`Options`] is a programmatic configuration surface: applications build it
//! directly (or deserialize it from a config file) and hand it to
//! [`TrafficParser::new`](crate::runtime::TrafficParser::new). Every field
//! except the capture source has a sensible default.

use serde::Deserialize;

/// Default snap length for live captures; matches tcpdump's default.
pub const DEFAULT_SNAP_LEN: i32 = 262144;

/// Runtime options for a capture session.
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Capture file path, or interface name when `live` is set.
    pub reader_name: String,

    /// Read from a live device instead of a capture file. Defaults to
    /// `false`.
    #[serde(default)]
    pub live: bool,

    /// BPF filter applied to the capture handle, if any.
    #[serde(default)]
    pub bpf_filter: Option<String>,

    /// The maximum time, in seconds, to wait before flushing a flow and
    /// delivering its data even if there is a gap in the collected sequence
    /// numbers. Defaults to 10 seconds.
    #[serde(default = "default_stream_flush_timeout")]
    pub stream_flush_timeout: u64,

    /// The maximum time, in seconds, a flow may stay idle before it is fully
    /// retired. Defaults to 90 seconds.
    #[serde(default = "default_stream_close_timeout")]
    pub stream_close_timeout: u64,

    /// Maximum number of out-of-order segments buffered across all
    /// connections.
    #[serde(default = "default_max_buffered_pages_total")]
    pub max_buffered_pages_total: usize,

    /// Maximum number of out-of-order segments buffered for any single
    /// connection. We want enough that a retransmitted packet arrives before
    /// we give up on the hole it fills.
    #[serde(default = "default_max_buffered_pages_per_connection")]
    pub max_buffered_pages_per_connection: usize,

    /// Maximum number of tracked connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Total size in bytes of the body buffer pool.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Size in bytes of each pool chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum HTTP message body length retained; longer bodies are
    /// truncated. Defaults to 1 MiB.
    #[serde(default = "default_http_max_body_len")]
    pub http_max_body_len: usize,

    /// Capacity of the emission channel. Producers block when it is full;
    /// this is the pipeline's back-pressure mechanism.
    #[serde(default = "default_emit_channel_capacity")]
    pub emit_channel_capacity: usize,
}

impl Options {
    /// Options for reading the capture file at `path`.
    pub fn file<S: Into<String>>(path: S) -> Options {
        Options {
            reader_name: path.into(),
            live: false,
            ..Options::default_values()
        }
    }

    /// Options for capturing live traffic on the interface `device`.
    pub fn device<S: Into<String>>(device: S) -> Options {
        Options {
            reader_name: device.into(),
            live: true,
            ..Options::default_values()
        }
    }

    /// Installs a BPF filter on the capture handle.
    pub fn with_bpf_filter<S: Into<String>>(mut self, filter: S) -> Options {
        self.bpf_filter = Some(filter.into());
        self
    }

    fn default_values() -> Options {
        Options {
            reader_name: String::new(),
            live: false,
            bpf_filter: None,
            stream_flush_timeout: default_stream_flush_timeout(),
            stream_close_timeout: default_stream_close_timeout(),
            max_buffered_pages_total: default_max_buffered_pages_total(),
            max_buffered_pages_per_connection: default_max_buffered_pages_per_connection(),
            max_connections: default_max_connections(),
            max_pool_size: default_max_pool_size(),
            chunk_size: default_chunk_size(),
            http_max_body_len: default_http_max_body_len(),
            emit_channel_capacity: default_emit_channel_capacity(),
        }
    }
}

fn default_stream_flush_timeout() -> u64 {
    10
}

fn default_stream_close_timeout() -> u64 {
    90
}

fn default_max_buffered_pages_total() -> usize {
    100_000
}

fn default_max_buffered_pages_per_connection() -> usize {
    4_000
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_pool_size() -> usize {
    64 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    4_096
}

fn default_http_max_body_len() -> usize {
    1024 * 1024
}

fn default_emit_channel_capacity() -> usize {
    100
}
