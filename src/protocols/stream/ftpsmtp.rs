//! FTP and SMTP command/response recognition.
//!
//! Both protocols are line-oriented with the same surface shape: a request is
//! a known command word, an optional space-separated argument, and CRLF; a
//! response is a three-digit status code, a space or hyphen, an argument, and
//! CRLF. One recognizer pair covers both command sets.

use crate::conntrack::conn_id::ConnectionId;
use crate::event::EventContent;
use crate::memory::View;
use crate::protocols::stream::{AcceptDecision, ParseStatus};

use anyhow::{bail, Result};
use serde::Serialize;

/// Minimum input length before a decision: the shortest command plus CRLF.
const MIN_LINE_LEN: usize = 5;

/// Longest command or reply line entertained (RFC 959 allows 512 including
/// CRLF).
const MAX_LINE_LEN: usize = 512;

/// FTP commands, RFC 959 section 4.
const FTP_COMMANDS: [&str; 33] = [
    // Access control
    "USER", "PASS", "ACCT", "CWD", "CDUP", "SMNT", "REIN", "QUIT",
    // Transfer parameters
    "PORT", "PASV", "TYPE", "STRU", "MODE",
    // Service
    "RETR", "STOR", "STOU", "APPE", "ALLO", "REST", "RNFR", "RNTO", "ABOR", "DELE", "RMD", "MKD",
    "PWD", "LIST", "NLST", "SITE", "SYST", "STAT", "HELP", "NOOP",
];

/// SMTP commands, RFC 5321.
const SMTP_COMMANDS: [&str; 12] = [
    "EHLO", "MAIL", "RCPT", "SIZE", "DATA", "VRFY", "TURN", "AUTH", "RSET", "EXPN", "HELP", "QUIT",
];

fn is_known_command(word: &[u8]) -> bool {
    FTP_COMMANDS
        .iter()
        .chain(SMTP_COMMANDS.iter())
        .any(|c| c.as_bytes() == word)
}

/// A parsed FTP or SMTP command line.
#[derive(Debug, Clone, Serialize)]
pub struct FtpSmtpRequest {
    /// Connection the command was observed on.
    pub connection_id: ConnectionId,
    /// The command word, e.g. `USER`.
    pub command: String,
    /// Everything between the command and CRLF, without the separating
    /// space. Empty for bare commands.
    pub arg: String,
}

/// A parsed FTP or SMTP reply line.
#[derive(Debug, Clone, Serialize)]
pub struct FtpSmtpResponse {
    /// Connection the reply was observed on.
    pub connection_id: ConnectionId,
    /// The three-digit status code as text, e.g. `331`.
    pub code: String,
    /// Everything between the separator and CRLF.
    pub arg: String,
}

/// Recognizes FTP/SMTP command lines.
#[derive(Debug)]
pub struct FtpSmtpRequestFactory;

impl FtpSmtpRequestFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_LINE_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }

        let line_end = input.index(0, b"\r\n");
        let sp = input.index(0, b" ");
        let word_end = match (sp, line_end) {
            (Some(sp), Some(eol)) => sp.min(eol),
            (Some(sp), None) => sp,
            (None, Some(eol)) => eol,
            // A command word longer than any we know cannot match.
            (None, None) => return (AcceptDecision::Reject, 0),
        };
        let word = match input.get_bytes(0, word_end) {
            Some(word) => word,
            None => return (AcceptDecision::Reject, 0),
        };
        if !is_known_command(&word) {
            return (AcceptDecision::Reject, 0);
        }
        match line_end {
            Some(_) => (AcceptDecision::Accept, 0),
            None if input.len() > MAX_LINE_LEN => (AcceptDecision::Reject, 0),
            None => (AcceptDecision::NeedMoreData, 0),
        }
    }
}

/// Recognizes FTP/SMTP reply lines.
#[derive(Debug)]
pub struct FtpSmtpResponseFactory;

impl FtpSmtpResponseFactory {
    pub(crate) fn accepts(&self, input: &View) -> (AcceptDecision, usize) {
        if input.len() < MIN_LINE_LEN {
            return (AcceptDecision::NeedMoreData, 0);
        }

        // Reply code: first digit '1'..'5', second '0'..'5', third any digit,
        // then a space (final line) or hyphen (multi-line continuation).
        let (d0, d1, d2, sep) = (
            input.get_byte(0),
            input.get_byte(1),
            input.get_byte(2),
            input.get_byte(3),
        );
        if !(b'1'..=b'5').contains(&d0) || !(b'0'..=b'5').contains(&d1) || !d2.is_ascii_digit() {
            return (AcceptDecision::Reject, 0);
        }
        if sep != b' ' && sep != b'-' {
            return (AcceptDecision::Reject, 0);
        }
        match input.index(0, b"\r\n") {
            Some(_) => (AcceptDecision::Accept, 0),
            None if input.len() > MAX_LINE_LEN => (AcceptDecision::Reject, 0),
            None => (AcceptDecision::NeedMoreData, 0),
        }
    }
}

/// Parses one command line, returning anything after the CRLF as unused.
#[derive(Debug)]
pub struct FtpSmtpRequestParser {
    connection_id: ConnectionId,
    all_input: View,
}

impl FtpSmtpRequestParser {
    pub(crate) fn new(connection_id: ConnectionId) -> FtpSmtpRequestParser {
        FtpSmtpRequestParser {
            connection_id,
            all_input: View::new(),
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.all_input.append(input);

        let line_end = match self.all_input.index(0, b"\r\n") {
            Some(eol) => eol,
            None if is_end => bail!("incomplete FTP/SMTP command line"),
            None => return Ok(ParseStatus::needs_more(self.all_input.len())),
        };

        let line = self
            .all_input
            .get_bytes(0, line_end)
            .unwrap_or_default();
        let (command, arg) = match line.iter().position(|&b| b == b' ') {
            Some(sp) => (&line[..sp], &line[sp + 1..]),
            None => (&line[..], &line[..0]),
        };

        let unused = self.all_input.sub_view(line_end + 2, self.all_input.len());
        let consumed = self.all_input.len() - unused.len();
        let request = FtpSmtpRequest {
            connection_id: self.connection_id,
            command: String::from_utf8_lossy(command).into_owned(),
            arg: String::from_utf8_lossy(arg).into_owned(),
        };
        Ok(ParseStatus::done(
            EventContent::FtpSmtpRequest(request),
            unused,
            consumed,
        ))
    }
}

/// Parses one reply line, returning anything after the CRLF as unused.
#[derive(Debug)]
pub struct FtpSmtpResponseParser {
    connection_id: ConnectionId,
    all_input: View,
}

impl FtpSmtpResponseParser {
    pub(crate) fn new(connection_id: ConnectionId) -> FtpSmtpResponseParser {
        FtpSmtpResponseParser {
            connection_id,
            all_input: View::new(),
        }
    }

    pub(crate) fn parse(&mut self, input: &View, is_end: bool) -> Result<ParseStatus> {
        self.all_input.append(input);

        let line_end = match self.all_input.index(0, b"\r\n") {
            Some(eol) => eol,
            None if is_end => bail!("incomplete FTP/SMTP reply line"),
            None => return Ok(ParseStatus::needs_more(self.all_input.len())),
        };

        let line = self
            .all_input
            .get_bytes(0, line_end)
            .unwrap_or_default();
        if line.len() < 4 {
            bail!("malformed FTP/SMTP reply line");
        }

        let unused = self.all_input.sub_view(line_end + 2, self.all_input.len());
        let consumed = self.all_input.len() - unused.len();
        let response = FtpSmtpResponse {
            connection_id: self.connection_id,
            code: String::from_utf8_lossy(&line[..3]).into_owned(),
            arg: String::from_utf8_lossy(&line[4..]).into_owned(),
        };
        Ok(ParseStatus::done(
            EventContent::FtpSmtpResponse(response),
            unused,
            consumed,
        ))
    }
}
