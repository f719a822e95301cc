//! Request normalization and reply synthesis.

use crate::resolver::client::MIN_UDP_SIZE;
use hickory_server::proto::op::{Edns, Message, MessageType, OpCode, ResponseCode};

/// Prepares a client request for forwarding: recursion is always requested and, unless
/// only TCP is used, the advertised UDP payload size is raised to `udp_max_bytes`.
pub fn normalize_request(request: &mut Message, udp_max_bytes: u16, tcp_only: bool) {
    request.set_recursion_desired(true);
    if !tcp_only {
        set_udp_size(request, udp_max_bytes);
    }
}

/// Advertises at least `size` bytes of UDP payload and returns the effective size.
///
/// An existing larger advertisement is kept. Sizes at or below 512 change nothing.
pub fn set_udp_size(request: &mut Message, size: u16) -> u16 {
    if size <= MIN_UDP_SIZE {
        return MIN_UDP_SIZE;
    }
    if let Some(edns) = request.extensions_mut() {
        if edns.max_payload() >= size {
            return edns.max_payload();
        }
        edns.set_max_payload(size);
        return size;
    }
    let mut edns = Edns::new();
    edns.set_max_payload(size);
    request.set_edns(edns);
    size
}

/// A syntactically valid reply with no answers that mirrors `request`.
pub fn empty_reply(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled());
    let code = if request.op_code() == OpCode::Query {
        ResponseCode::NoError
    } else {
        ResponseCode::NotImp
    };
    reply.set_response_code(code);
    reply.add_queries(request.queries().to_vec());
    reply
}
