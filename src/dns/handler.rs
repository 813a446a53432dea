//! hickory request handler sitting in front of the resolver.

use async_trait::async_trait;
use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error};

use super::ZoneResolver;
use crate::metrics::{self, QueryResult, Timer};

/// Answers every request with exactly one authoritative reply.
#[derive(Clone)]
pub struct DnsHandler {
    resolver: ZoneResolver,
}

impl DnsHandler {
    /// Wrap a resolver.
    pub fn new(resolver: ZoneResolver) -> Self {
        Self { resolver }
    }

    async fn reply_error<R: ResponseHandler>(
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> ResponseInfo {
        let response = MessageResponseBuilder::from_message_request(request)
            .error_msg(request.header(), code);
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to send DNS error response");
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(code);
                header.into()
            }
        }
    }
}

fn query_result(code: ResponseCode) -> QueryResult {
    match code {
        ResponseCode::NoError => QueryResult::Success,
        ResponseCode::NXDomain => QueryResult::NxDomain,
        _ => QueryResult::ServFail,
    }
}

#[async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        if request.message_type() != MessageType::Query || request.op_code() != OpCode::Query {
            debug!(op_code = ?request.op_code(), "unsupported operation");
            return Self::reply_error(request, response_handle, ResponseCode::NotImp).await;
        }

        let Some(query) = request.queries().first() else {
            debug!(src = %request.src(), "request without a question");
            return Self::reply_error(request, response_handle, ResponseCode::FormErr).await;
        };

        let timer = Timer::start();
        let record_type = query.query_type();
        let resolution = self.resolver.resolve(query.name(), record_type).await;

        let type_str = record_type.to_string();
        let result = query_result(resolution.response_code);
        metrics::record_query(&type_str, result, timer.elapsed());
        if result == QueryResult::Success {
            metrics::record_answers_returned(&type_str, resolution.answers.len());
        }
        debug!(
            name = %query.name(),
            rtype = %record_type,
            code = ?resolution.response_code,
            answers = resolution.answers.len(),
            additionals = resolution.additionals.len(),
            "DNS query answered"
        );

        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(resolution.response_code);

        let response = MessageResponseBuilder::from_message_request(request).build(
            header.clone(),
            resolution.answers.iter(),
            std::iter::empty(),
            std::iter::empty(),
            resolution.additionals.iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(error = %e, "failed to send DNS response");
                header.into()
            }
        }
    }
}
