//! DNS request handler
//!
//! Every name under a bound TLD exists: the answer is the querying client's
//! own address (so `app.test` resolves to wherever the query came from,
//! typically 127.0.0.1), or a local non-loopback IPv4 in local-ip mode.
//! Queries outside the bound TLDs are refused.

use std::net::IpAddr;
use std::str::FromStr;

use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{LowerName, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use candy_core::error::{Error, Result};

/// Handler scoped to a fixed set of TLD suffixes.
///
/// The suffix table is per-instance so several servers can coexist in one
/// process; nothing is registered globally.
pub struct Handler {
    zones: Vec<LowerName>,
    local_ip: bool,
}

impl Handler {
    pub fn new(tlds: &[String], local_ip: bool) -> Result<Self> {
        let zones = tlds
            .iter()
            .map(|tld| {
                Name::from_str(&format!("{tld}."))
                    .map(LowerName::from)
                    .map_err(|err| Error::Config(format!("invalid TLD {tld}: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { zones, local_ip })
    }

    fn in_zones(&self, name: &LowerName) -> bool {
        self.zones.iter().any(|zone| zone.zone_of(name))
    }

    /// The address to answer with: the client's source address, or the first
    /// non-loopback IPv4 interface address in local-ip mode. A local-ip miss
    /// yields no address, which turns into an empty (NODATA) answer.
    fn answer_ip(&self, src: IpAddr) -> Option<IpAddr> {
        if !self.local_ip {
            return Some(src);
        }

        match local_ip_address::list_afinet_netifas() {
            Ok(interfaces) => interfaces
                .into_iter()
                .map(|(_, ip)| ip)
                .find(|ip| ip.is_ipv4() && !ip.is_loopback()),
            Err(err) => {
                tracing::warn!(%err, "failed to enumerate local interfaces");
                None
            }
        }
    }

    async fn respond<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: &mut R,
    ) -> std::io::Result<ResponseInfo> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let query = request.query();

        if request.header().message_type() != MessageType::Query
            || request.header().op_code() != OpCode::Query
            || !self.in_zones(query.name())
        {
            let response = builder.error_msg(request.header(), ResponseCode::Refused);
            return response_handle.send_response(response).await;
        }

        let name = Name::from(query.name().clone());
        let answers = build_answers(name, query.query_type(), self.answer_ip(request.src().ip()));

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);

        let empty: Vec<Record> = Vec::new();
        let response = builder.build(header, answers.iter(), empty.iter(), empty.iter(), empty.iter());
        response_handle.send_response(response).await
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        match self.respond(request, &mut response_handle).await {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(%err, "failed to send DNS response");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

/// An IPv4-mapped IPv6 source (e.g. `::ffff:127.0.0.1`) answers as IPv4.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// At most one A or AAAA record, TTL 0. Query types other than A/AAAA get a
/// well-formed empty answer, as does a missing address.
fn build_answers(name: Name, qtype: RecordType, ip: Option<IpAddr>) -> Vec<Record> {
    if !matches!(qtype, RecordType::A | RecordType::AAAA) {
        return Vec::new();
    }

    let Some(ip) = ip else {
        return Vec::new();
    };

    let rdata = match canonical_ip(ip) {
        IpAddr::V4(v4) => RData::A(A::from(v4)),
        IpAddr::V6(v6) => RData::AAAA(AAAA::from(v6)),
    };

    vec![Record::from_rdata(name, 0, rdata)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn lower(name: &str) -> LowerName {
        LowerName::from(Name::from_str(name).unwrap())
    }

    #[test]
    fn scopes_to_configured_tlds() {
        let handler = Handler::new(&["test".to_string(), "dev".to_string()], false).unwrap();

        assert!(handler.in_zones(&lower("app.test.")));
        assert!(handler.in_zones(&lower("deep.sub.dev.")));
        assert!(!handler.in_zones(&lower("app.example.com.")));
        assert!(!handler.in_zones(&lower("test.com.")));
    }

    #[test]
    fn answers_with_client_source() {
        let handler = Handler::new(&["test".to_string()], false).unwrap();
        let src = IpAddr::V4(Ipv4Addr::LOCALHOST);

        assert_eq!(handler.answer_ip(src), Some(src));
    }

    #[test]
    fn a_record_with_zero_ttl() {
        let name = Name::from_str("app.test.").unwrap();
        let answers = build_answers(
            name.clone(),
            RecordType::A,
            Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
        );

        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].ttl(), 0);
        assert_eq!(answers[0].record_type(), RecordType::A);
        assert_eq!(*answers[0].name(), name);
    }

    #[test]
    fn mapped_ipv6_source_answers_as_ipv4() {
        let mapped = IpAddr::V6(Ipv4Addr::new(127, 0, 0, 1).to_ipv6_mapped());
        let answers = build_answers(Name::from_str("app.test.").unwrap(), RecordType::A, Some(mapped));

        assert_eq!(answers[0].record_type(), RecordType::A);
    }

    #[test]
    fn plain_ipv6_source_answers_as_aaaa() {
        let v6 = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1));
        let answers = build_answers(Name::from_str("app.test.").unwrap(), RecordType::AAAA, Some(v6));

        assert_eq!(answers[0].record_type(), RecordType::AAAA);
    }

    #[test]
    fn other_query_types_get_empty_answers() {
        let answers = build_answers(
            Name::from_str("app.test.").unwrap(),
            RecordType::TXT,
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        );
        assert!(answers.is_empty());
    }

    #[test]
    fn missing_address_yields_nodata() {
        let answers = build_answers(Name::from_str("app.test.").unwrap(), RecordType::A, None);
        assert!(answers.is_empty());
    }
}
