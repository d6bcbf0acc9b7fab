//! DNS payload decoding for UDP traffic.
//!
//! DNS is decoded per datagram with the [dns-parser](https://docs.rs/dns-parser)
//! crate; there is no transaction pairing here. A decoded message rides along
//! on the UDP traffic event that carried it.

use serde::Serialize;

/// Header flags of a DNS message.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DnsFlags {
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
}

/// One entry of the question section.
#[derive(Debug, Clone, Serialize)]
pub struct DnsQuestion {
    pub name: String,
    pub query_type: u16,
}

/// One resource record from the answer, authority, or additional sections.
#[derive(Debug, Clone, Serialize)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: u16,
    pub ttl: u32,
    /// Record data rendered to text: the address for A/AAAA, the target name
    /// for CNAME/NS/PTR, preference and exchange for MX, joined strings for
    /// TXT. Empty for unrendered types.
    pub data: String,
}

/// A decoded DNS message.
#[derive(Debug, Clone, Serialize)]
pub struct DnsMessage {
    pub id: u16,
    /// `true` for responses, `false` for queries.
    pub is_response: bool,
    pub opcode: u16,
    pub response_code: u8,
    pub flags: DnsFlags,
    /// Section entry counts as decoded: questions, answers, authorities,
    /// additionals.
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub additionals: Vec<DnsRecord>,
}

/// Decodes `payload` as a DNS message, returning `None` when it does not
/// parse.
pub fn parse_dns(payload: &[u8]) -> Option<DnsMessage> {
    let pkt = match dns_parser::Packet::parse(payload) {
        Ok(pkt) => pkt,
        Err(e) => {
            log::trace!("not a DNS payload: {}", e);
            return None;
        }
    };

    let header = &pkt.header;
    let questions = pkt
        .questions
        .iter()
        .map(|q| DnsQuestion {
            name: q.qname.to_string(),
            query_type: q.qtype as u16,
        })
        .collect();

    Some(DnsMessage {
        id: header.id,
        is_response: !header.query,
        opcode: opcode_value(header.opcode),
        response_code: rcode_value(header.response_code),
        flags: DnsFlags {
            authoritative: header.authoritative,
            truncated: header.truncated,
            recursion_desired: header.recursion_desired,
            recursion_available: header.recursion_available,
        },
        question_count: header.questions,
        answer_count: header.answers,
        authority_count: header.nameservers,
        additional_count: header.additional,
        questions,
        answers: records(&pkt.answers),
        authorities: records(&pkt.nameservers),
        additionals: records(&pkt.additional),
    })
}

fn records(rrs: &[dns_parser::ResourceRecord<'_>]) -> Vec<DnsRecord> {
    rrs.iter()
        .map(|rr| DnsRecord {
            name: rr.name.to_string(),
            record_type: rdata_type(&rr.data),
            ttl: rr.ttl,
            data: rdata_text(&rr.data),
        })
        .collect()
}

fn opcode_value(opcode: dns_parser::Opcode) -> u16 {
    use dns_parser::Opcode::*;
    match opcode {
        StandardQuery => 0,
        InverseQuery => 1,
        ServerStatusRequest => 2,
        Reserved(x) => x,
    }
}

fn rcode_value(rcode: dns_parser::ResponseCode) -> u8 {
    use dns_parser::ResponseCode::*;
    match rcode {
        NoError => 0,
        FormatError => 1,
        ServerFailure => 2,
        NameError => 3,
        NotImplemented => 4,
        Refused => 5,
        Reserved(x) => x,
    }
}

fn rdata_type(data: &dns_parser::RData<'_>) -> u16 {
    use dns_parser::RData::*;
    match data {
        A(_) => 1,
        NS(_) => 2,
        CNAME(_) => 5,
        SOA(_) => 6,
        PTR(_) => 12,
        MX(_) => 15,
        TXT(_) => 16,
        AAAA(_) => 28,
        SRV(_) => 33,
        // The parser does not surface the type code of unknown records.
        Unknown(_) => 0,
    }
}

fn rdata_text(data: &dns_parser::RData<'_>) -> String {
    use dns_parser::RData::*;
    match data {
        A(a) => a.0.to_string(),
        AAAA(aaaa) => aaaa.0.to_string(),
        CNAME(name) => name.0.to_string(),
        NS(name) => name.0.to_string(),
        PTR(name) => name.0.to_string(),
        MX(mx) => format!("{} {}", mx.preference, mx.exchange),
        TXT(txt) => txt
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(""),
        SOA(soa) => format!("{} {}", soa.primary_ns, soa.mailbox),
        SRV(srv) => format!("{} {} {}", srv.priority, srv.port, srv.target),
        Unknown(_) => String::new(),
    }
}
