//! FastCGI protocol engine: groups records into requests and dispatches
//! complete requests to the application handler.
//!
//! The engine runs on its own thread and is the exclusive owner of the
//! request accumulators, keyed by `(connection, request id)` so two
//! connections reusing the same small request id can never corrupt each
//! other. A request is the record sequence begin-request, params stream,
//! stdin stream, each stream ended by a zero-length record of its type;
//! any other shape is a protocol violation and drops the connection.

use std::collections::HashMap;
use std::sync::Arc;

use mio::Waker;
use tracing::{debug, warn};

use crate::constants::{ENGINE_POLL_TIMEOUT, MAX_CONTENT_LEN};
use crate::message::{ConnId, InboundMessage, OutboundMessage, ReplyHandle};
use crate::metrics;
use crate::queue::{Consumed, Consumer, Producer};
use crate::record::{
    BeginRequestBody, EndRequestBody, ProtocolError, REQUEST_COMPLETE, ROLE_RESPONDER, Record,
    RecordHeader, RecordType,
};
use crate::shutdown::ShutdownToken;

/// Application callback invoked once per complete request, injected at
/// construction. Implemented for any matching closure or function.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, body: &[u8], params: &HashMap<String, String>) -> Vec<u8>;
}

impl<F> Handler for F
where
    F: Fn(&[u8], &HashMap<String, String>) -> Vec<u8> + Send + Sync + 'static,
{
    fn handle(&self, body: &[u8], params: &HashMap<String, String>) -> Vec<u8> {
        self(body, params)
    }
}

/// Records received so far for one request in progress.
struct RequestAccumulator {
    records: Vec<Record>,
    keep_conn: bool,
}

pub struct Engine<H> {
    incoming: Consumer<InboundMessage>,
    outgoing: Producer<OutboundMessage>,
    closes: crossbeam_channel::Sender<ConnId>,
    waker: Arc<Waker>,
    shutdown: ShutdownToken,
    handler: H,
    requests: HashMap<(ConnId, u16), RequestAccumulator>,
}

impl<H: Handler> Engine<H> {
    pub fn new(
        incoming: Consumer<InboundMessage>,
        outgoing: Producer<OutboundMessage>,
        closes: crossbeam_channel::Sender<ConnId>,
        waker: Arc<Waker>,
        shutdown: ShutdownToken,
        handler: H,
    ) -> Engine<H> {
        Engine {
            incoming,
            outgoing,
            closes,
            waker,
            shutdown,
            handler,
            requests: HashMap::new(),
        }
    }

    pub fn run(mut self) {
        loop {
            match self.incoming.consume_timeout(ENGINE_POLL_TIMEOUT) {
                Consumed::Message(message) => self.process(message),
                Consumed::TimedOut => {
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                }
                Consumed::Closed => return,
            }
        }
    }

    /// Handle one queued message. Public so tests can drive the engine
    /// without a live socket loop.
    pub fn process(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Disconnected { conn } => {
                self.requests.retain(|(c, _), _| *c != conn);
            }
            InboundMessage::Record { conn, reply, record } => {
                if let Err(violation) = self.handle_record(conn, &reply, record) {
                    metrics::inc_protocol_violations();
                    warn!(conn, %violation, "protocol violation, dropping connection");
                    self.requests.retain(|(c, _), _| *c != conn);
                    if self.closes.send(conn).is_ok() {
                        let _ = self.waker.wake();
                    }
                }
            }
        }
    }

    fn handle_record(
        &mut self,
        conn: ConnId,
        reply: &ReplyHandle,
        record: Record,
    ) -> Result<(), ProtocolError> {
        let key = (conn, record.header.request_id);
        match record.header.rtype {
            RecordType::BeginRequest => self.begin_request(key, record),
            RecordType::Params => self.append_record(key, record),
            RecordType::Stdin => {
                let finished = record.header.content_len == 0;
                self.append_record(key, record)?;
                if finished {
                    self.finalize(key, reply)
                } else {
                    Ok(())
                }
            }
            other => Err(ProtocolError::UnsupportedRecordType(other)),
        }
    }

    fn begin_request(&mut self, key: (ConnId, u16), record: Record) -> Result<(), ProtocolError> {
        let body = BeginRequestBody::decode(&record.content)?;
        if body.role != ROLE_RESPONDER {
            return Err(ProtocolError::UnsupportedRole(body.role));
        }
        if self.requests.contains_key(&key) {
            return Err(ProtocolError::DuplicateBeginRequest);
        }
        debug!(conn = key.0, request_id = key.1, "begin request");
        self.requests.insert(
            key,
            RequestAccumulator {
                keep_conn: body.keep_conn(),
                records: vec![record],
            },
        );
        Ok(())
    }

    fn append_record(&mut self, key: (ConnId, u16), record: Record) -> Result<(), ProtocolError> {
        let request = self
            .requests
            .get_mut(&key)
            .ok_or(ProtocolError::MissingBeginRequest)?;
        request.records.push(record);
        Ok(())
    }

    /// The stdin terminator arrived: validate the accumulated records,
    /// decode params and body, dispatch, respond.
    fn finalize(&mut self, key: (ConnId, u16), reply: &ReplyHandle) -> Result<(), ProtocolError> {
        let request = self
            .requests
            .remove(&key)
            .ok_or(ProtocolError::MissingBeginRequest)?;

        let mut records = request.records.iter();
        let first = records.next().ok_or(ProtocolError::MissingBeginRequest)?;
        if first.header.rtype != RecordType::BeginRequest
            || first.content.len() != BeginRequestBody::WIRE_LEN
        {
            return Err(ProtocolError::MissingBeginRequest);
        }

        let raw_params = collect_stream(RecordType::Params, &mut records)?;
        let body = collect_stream(RecordType::Stdin, &mut records)?;
        let params = parse_nv_pairs(&raw_params)?;

        let response = self.handler.handle(&body, &params);
        metrics::inc_requests_completed();
        debug!(
            conn = key.0,
            request_id = key.1,
            body_len = body.len(),
            response_len = response.len(),
            "request complete"
        );
        self.respond(key, reply, &response, request.keep_conn);
        Ok(())
    }

    /// Frame the handler output as a stdout stream plus end-request. The
    /// end-request message closes the connection unless the client asked
    /// to keep it open.
    fn respond(&self, key: (ConnId, u16), reply: &ReplyHandle, response: &[u8], keep_conn: bool) {
        let (conn, request_id) = key;
        for chunk in response.chunks(MAX_CONTENT_LEN) {
            let message = OutboundMessage {
                conn,
                reply: reply.clone(),
                header: RecordHeader::for_content(RecordType::Stdout, request_id, chunk.len() as u16),
                content: chunk.to_vec(),
                last_on_connection: false,
            };
            if self.outgoing.produce(message).is_err() {
                return;
            }
        }

        let terminator = OutboundMessage {
            conn,
            reply: reply.clone(),
            header: RecordHeader::for_content(RecordType::Stdout, request_id, 0),
            content: Vec::new(),
            last_on_connection: false,
        };
        if self.outgoing.produce(terminator).is_err() {
            return;
        }

        let end_body = EndRequestBody {
            app_status: 0,
            protocol_status: REQUEST_COMPLETE,
        };
        let end = OutboundMessage {
            conn,
            reply: reply.clone(),
            header: RecordHeader::for_content(
                RecordType::EndRequest,
                request_id,
                EndRequestBody::WIRE_LEN as u16,
            ),
            content: end_body.encode().to_vec(),
            last_on_connection: !keep_conn,
        };
        let _ = self.outgoing.produce(end);
    }
}

/// Concatenate the contents of consecutive `rtype` records up to and
/// excluding the zero-length terminator. Running out of records before
/// the terminator, or hitting a record of another type, is a violation;
/// a stream is never silently truncated.
pub fn collect_stream<'a>(
    rtype: RecordType,
    records: &mut impl Iterator<Item = &'a Record>,
) -> Result<Vec<u8>, ProtocolError> {
    let mut stream = Vec::new();
    loop {
        let record = records
            .next()
            .ok_or(ProtocolError::UnterminatedStream(rtype))?;
        if record.header.rtype != rtype {
            return Err(ProtocolError::UnexpectedRecord {
                want: rtype,
                got: record.header.rtype,
            });
        }
        if record.content.is_empty() {
            return Ok(stream);
        }
        stream.extend_from_slice(&record.content);
    }
}

/// Decode one length as encoded in the parameter stream: a byte with the
/// high bit clear is the value itself; otherwise the low seven bits and
/// the next three bytes form a 31-bit big-endian value.
pub fn consume_length(cursor: &mut &[u8]) -> Result<u32, ProtocolError> {
    let (&first, rest) = cursor
        .split_first()
        .ok_or(ProtocolError::TruncatedNameValue)?;
    if first & 0x80 == 0 {
        *cursor = rest;
        return Ok(u32::from(first));
    }
    if rest.len() < 3 {
        return Err(ProtocolError::TruncatedNameValue);
    }
    let value = u32::from(first & 0x7f) << 24
        | u32::from(rest[0]) << 16
        | u32::from(rest[1]) << 8
        | u32::from(rest[2]);
    *cursor = &rest[3..];
    Ok(value)
}

/// Decode the raw parameter stream into a name → value map. Duplicate
/// names keep the last value seen.
pub fn parse_nv_pairs(mut data: &[u8]) -> Result<HashMap<String, String>, ProtocolError> {
    let mut pairs = HashMap::new();
    while !data.is_empty() {
        let name_len = consume_length(&mut data)? as usize;
        let value_len = consume_length(&mut data)? as usize;
        if data.len() < name_len + value_len {
            return Err(ProtocolError::TruncatedNameValue);
        }
        let (name, rest) = data.split_at(name_len);
        let (value, rest) = rest.split_at(value_len);
        data = rest;
        pairs.insert(
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
    }
    Ok(pairs)
}
