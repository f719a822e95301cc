use super::orchestrator::{Orchestrator, Resolution};
use super::types::QueryContext;
use crate::logger::{QueryLogEntry, QueryLogger};
use crate::stats::StatsCollector;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, Message, MessageType, ResponseCode};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct DnsHandler {
    orchestrator: Arc<Orchestrator>,
    stats: Arc<StatsCollector>,
    logger: Arc<QueryLogger>,
}

impl DnsHandler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        stats: Arc<StatsCollector>,
        logger: Arc<QueryLogger>,
    ) -> Self {
        Self {
            orchestrator,
            stats,
            logger,
        }
    }

    /// Rebuilds the client's query as a standalone message for forwarding.
    fn to_message(request: &Request) -> Message {
        let header = request.header();
        let mut message = Message::new();
        message
            .set_id(header.id())
            .set_message_type(MessageType::Query)
            .set_op_code(header.op_code())
            .set_recursion_desired(header.recursion_desired())
            .set_checking_disabled(header.checking_disabled())
            .set_authentic_data(header.authentic_data());
        for query in request.queries() {
            message.add_query(query.original().clone());
        }
        if let Some(edns) = request.edns() {
            message.set_edns(edns.clone());
        }
        message
    }

    async fn send<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        reply: &Message,
    ) -> ResponseInfo {
        let mut header = *reply.header();
        header.set_id(request.header().id());
        header.set_message_type(MessageType::Response);

        let mut builder = MessageResponseBuilder::from_message_request(request);
        if let Some(edns) = reply.extensions() {
            builder.edns(edns.clone());
        }
        let response = builder.build(
            header,
            reply.answers().iter(),
            reply.name_servers().iter(),
            &[],
            reply.additionals().iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send response: {}", e);
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::ServFail);
                ResponseInfo::from(header)
            }
        }
    }

    fn log(&self, query: QueryContext, resolution: &Resolution) {
        if !self.logger.is_enabled() {
            return;
        }
        self.logger.log(QueryLogEntry {
            client_ip: query.client_ip,
            domain: query.name,
            query_type: query.qtype,
            action: resolution.action,
            upstream: resolution.upstream.as_ref().map(|r| r.address()),
            latency_ms: query.start.elapsed().as_millis() as u64,
        });
    }
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        self.stats.inc_queries();
        let query_ctx = QueryContext::from_request(request);

        let resolution = self.orchestrator.serve(Self::to_message(request)).await;
        let info = self
            .send(request, response_handle, &resolution.reply)
            .await;

        self.log(query_ctx, &resolution);
        info
    }
}
