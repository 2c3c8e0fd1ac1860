//! End-to-end session behaviour against a scripted in-memory proxy.

use std::time::Duration;

use devproxy::{
    BrowseEvent, BrowseFlags, BrowseResponse, CallOptions, CloseReason, CloseResponse, CodecKind,
    Content, DataMessage, Error, FrameRead, FrameWrite, MemoryReader, MemoryTransport,
    MemoryWriter, Message, OpenOptions, PingResponse, Property, Reference, Session, SessionConfig,
    SocketAddress, SocketInfo, SocketOption, Transport,
};
use devproxy_proto::content::{LinkResponse, OpenResponse, PhysicalAddress, PollResponse};
use devproxy_proto::{BrowseRequest, BrowseType, GetOptResponse, MessageType, codec};
use tokio_util::sync::CancellationToken;

/// The proxy end of a memory transport.
struct MockProxy {
    reader: MemoryReader,
    writer: MemoryWriter,
    codec: CodecKind,
}

impl MockProxy {
    async fn recv(&mut self) -> Message {
        let frame = self.reader.read_frame().await.unwrap().unwrap();
        Message::from_slice(self.codec, &frame).unwrap()
    }

    /// Asserts that nothing arrives for a short while.
    async fn expect_silence(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(50), self.reader.read_frame()).await;
        assert!(res.is_err(), "unexpected frame from client");
    }

    async fn send(&mut self, msg: &Message) {
        let frame = msg.to_vec(self.codec).unwrap();
        self.writer.write_frame(&frame).await.unwrap();
    }

    async fn reply(&mut self, req: &Message, content: impl Into<Content>) {
        self.send(&Message::response_to(req, content)).await;
    }

    /// Answers a link request and returns the new link id.
    async fn accept_link(&mut self) -> Reference {
        let req = self.recv().await;
        assert!(matches!(req.content, Some(Content::LinkRequest(_))));
        let link_id = Reference::new();
        let resp = LinkResponse {
            link_id,
            local_address: "10.0.0.2:40000".parse::<std::net::SocketAddr>().unwrap().into(),
            peer_address: SocketAddress::proxy("plc-7", 502),
        };
        self.reply(&req, resp).await;
        link_id
    }

    /// Answers an open request and returns the stream id.
    async fn accept_open(&mut self, link_id: Reference) -> (Reference, bool) {
        let req = self.recv().await;
        assert_eq!(req.target, link_id);
        let Some(Content::OpenRequest(open)) = &req.content else {
            panic!("expected OpenRequest, got {:?}", req.content);
        };
        let stream = (open.stream_id, open.is_polled);
        self.reply(&req, OpenResponse {}).await;
        stream
    }
}

fn start(codec: CodecKind) -> (Session, MockProxy) {
    let (client, proxy) = MemoryTransport::pair();
    let config = SessionConfig::default()
        .codec(codec)
        .request_timeout(Duration::from_secs(5));
    let session = Session::connect(client, config).unwrap();
    let (reader, writer) = proxy.into_split();
    (
        session,
        MockProxy {
            reader,
            writer,
            codec,
        },
    )
}

fn ping_response(time_ms: u32) -> PingResponse {
    PingResponse {
        address: SocketAddress::proxy("gateway", 0),
        physical_address: PhysicalAddress([1, 2, 3, 4, 5, 6, 0, 0]),
        time_ms,
    }
}

#[tokio::test]
async fn ping_roundtrip_in_both_codecs() {
    for codec in [CodecKind::Pack, CodecKind::Json] {
        let (session, mut proxy) = start(codec);
        let client = session.clone();
        let call =
            tokio::spawn(
                async move { client.ping(Reference::NULL, SocketAddress::proxy("gateway", 0)).await },
            );

        let req = proxy.recv().await;
        assert_eq!(req.type_id, MessageType::Ping.code());
        assert!(!req.is_response);
        assert_eq!(req.source, session.source());
        proxy.reply(&req, ping_response(12)).await;

        assert_eq!(call.await.unwrap().unwrap(), ping_response(12));
        assert_eq!(session.pending_requests(), 0);
    }
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let (a, b) = (session.clone(), session.clone());
    let call_a = tokio::spawn(async move { a.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req_a = proxy.recv().await;
    let call_b = tokio::spawn(async move { b.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req_b = proxy.recv().await;
    assert_ne!(req_a.sequence_id, req_b.sequence_id);

    proxy.reply(&req_b, ping_response(2)).await;
    proxy.reply(&req_a, ping_response(1)).await;

    assert_eq!(call_a.await.unwrap().unwrap().time_ms, 1);
    assert_eq!(call_b.await.unwrap().unwrap().time_ms, 2);
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn timeout_cleans_up_and_late_response_is_dropped() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let opts = CallOptions::default().timeout(Duration::from_millis(30));
    let call = tokio::spawn(async move {
        client
            .request::<PingResponse>(
                Reference::NULL,
                Reference::NULL,
                devproxy_proto::PingRequest {
                    address: SocketAddress::Unspecified,
                },
                &opts,
            )
            .await
    });
    let late = proxy.recv().await;

    assert!(matches!(call.await.unwrap(), Err(Error::Timeout(_))));
    assert_eq!(session.pending_requests(), 0);

    // The late answer is discarded and the session keeps working.
    proxy.reply(&late, ping_response(99)).await;
    let client = session.clone();
    let next = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req = proxy.recv().await;
    proxy.reply(&req, ping_response(5)).await;
    assert_eq!(next.await.unwrap().unwrap().time_ms, 5);
}

#[tokio::test]
async fn remote_error_code_is_surfaced() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let call = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req = proxy.recv().await;
    proxy
        .send(&Message::response_to(&req, ping_response(0)).with_error(-113))
        .await;
    assert!(matches!(call.await.unwrap(), Err(Error::Remote { code: -113 })));
}

#[tokio::test]
async fn wrong_payload_is_unexpected_content() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let call = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req = proxy.recv().await;
    proxy.reply(&req, PollResponse {}).await;
    assert!(matches!(
        call.await.unwrap(),
        Err(Error::UnexpectedContent {
            expected: "PingResponse",
            found: "PollResponse"
        })
    ));
}

#[tokio::test]
async fn cancellation_releases_the_request() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let token = CancellationToken::new();
    let client = session.clone();
    let opts = CallOptions::default().cancel(token.clone());
    let call = tokio::spawn(async move {
        client
            .call(
                Reference::NULL,
                Reference::NULL,
                devproxy_proto::PingRequest {
                    address: SocketAddress::Unspecified,
                },
                &opts,
            )
            .await
    });
    let _req = proxy.recv().await;
    assert_eq!(session.pending_requests(), 1);
    token.cancel();
    assert!(matches!(call.await.unwrap(), Err(Error::Cancelled)));
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn session_close_fails_pending_requests() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let call = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let _req = proxy.recv().await;
    session.close();
    assert!(matches!(call.await.unwrap(), Err(Error::Closed)));
    assert!(session.is_closed());
}

#[tokio::test]
async fn transport_eof_fails_pending_requests() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let call = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let _req = proxy.recv().await;
    drop(proxy);
    assert!(matches!(call.await.unwrap(), Err(Error::Closed)));
}

#[tokio::test]
async fn link_data_and_close_statistics() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let mut link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
            .await?;
        link.open(OpenOptions::default()).await?;
        link.send(b"hello".to_vec()).await?;
        let reply = link.recv().await?;
        let stats = link.close().await?;
        let again = link.close().await?;
        assert_eq!(stats, again);
        assert!(link.recv().await?.is_none());
        Ok::<_, Error>((reply, stats))
    });

    let link_id = proxy.accept_link().await;
    let (stream_id, polled) = proxy.accept_open(link_id).await;
    assert!(!polled);

    let data = proxy.recv().await;
    assert_eq!(data.target, stream_id);
    let Some(Content::Data(sent)) = &data.content else {
        panic!("expected data, got {:?}", data.content);
    };
    assert_eq!(sent.payload, b"hello");
    assert_eq!(sent.sequence_number, 0);

    let inbound = Message::new(stream_id, session.source(), DataMessage::new(b"world!".to_vec()));
    proxy.send(&inbound).await;

    let close = proxy.recv().await;
    assert_eq!(close.target, link_id);
    assert!(matches!(close.content, Some(Content::CloseRequest(_))));
    proxy.reply(&close, CloseResponse::new(1000, 500, 700, 0)).await;

    let (reply, stats) = link_task.await.unwrap().unwrap();
    assert_eq!(reply.unwrap().payload, b"world!");
    assert_eq!(stats.remote, CloseResponse::new(1000, 500, 700, 0));
    assert_eq!(stats.bytes_sent, 5);
    assert_eq!(stats.bytes_received, 6);
    assert_eq!(stats.reason, CloseReason::Local);

    // Closing twice never reached the proxy a second time.
    proxy.expect_silence().await;
}

#[tokio::test]
async fn remote_close_notification_tears_down_the_link() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let (linked_tx, linked_rx) = tokio::sync::oneshot::channel();
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let mut link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
            .await?;
        let _ = linked_tx.send(());
        let first = link.recv().await?;
        let stats = link.close().await?;
        Ok::<_, Error>((first, stats))
    });

    let link_id = proxy.accept_link().await;
    linked_rx.await.unwrap();
    let notice = Message::new(link_id, session.source(), CloseResponse::new(10, 20, 30, 104));
    proxy.send(&notice).await;

    let (first, stats) = link_task.await.unwrap().unwrap();
    assert!(first.is_none());
    assert_eq!(stats.reason, CloseReason::Remote);
    assert_eq!(stats.remote.error_code, 104);
    proxy.expect_silence().await;
}

#[tokio::test]
async fn close_notice_sharing_a_request_sequence_goes_to_the_link() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let (linked_tx, linked_rx) = tokio::sync::oneshot::channel();
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let mut link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
            .await?;
        let _ = linked_tx.send(());
        let first = link.recv().await?;
        let stats = link.close().await?;
        Ok::<_, Error>((first, stats))
    });
    let link_id = proxy.accept_link().await;
    linked_rx.await.unwrap();

    let client = session.clone();
    let ping = tokio::spawn(async move { client.ping(Reference::NULL, SocketAddress::Unspecified).await });
    let req = proxy.recv().await;

    let notice = Message::new(link_id, session.source(), CloseResponse::new(0, 0, 0, 104))
        .with_sequence(req.sequence_id);
    proxy.send(&notice).await;

    let (first, stats) = tokio::time::timeout(Duration::from_secs(1), link_task)
        .await
        .expect("link was not told it closed")
        .unwrap()
        .unwrap();
    assert!(first.is_none());
    assert_eq!(stats.reason, CloseReason::Remote);
    assert_eq!(stats.remote.error_code, 104);

    // The ping is still waiting for its own answer.
    assert_eq!(session.pending_requests(), 1);
    proxy.reply(&req, ping_response(7)).await;
    assert_eq!(ping.await.unwrap().unwrap().time_ms, 7);
}

#[tokio::test]
async fn named_proxy_answers_only_from_itself() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let via = Reference::new();
    let client = session.clone();
    let ping = tokio::spawn(async move { client.ping(via, SocketAddress::Unspecified).await });
    let req = proxy.recv().await;
    assert_eq!(req.proxy, via);

    let mut stray = Message::response_to(&req, ping_response(1));
    stray.source = Reference::new();
    proxy.send(&stray).await;
    let mut answer = Message::response_to(&req, ping_response(2));
    answer.source = via;
    proxy.send(&answer).await;

    assert_eq!(ping.await.unwrap().unwrap().time_ms, 2);
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test]
async fn second_open_is_rejected_without_a_request() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let mut link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
            .await?;
        link.open(OpenOptions::default()).await?;
        let again = link.open(OpenOptions::default().polled(true)).await;
        Ok::<_, Error>((link, again))
    });

    let link_id = proxy.accept_link().await;
    let (stream_id, _) = proxy.accept_open(link_id).await;

    let (link, again) = link_task.await.unwrap().unwrap();
    assert!(matches!(again, Err(Error::AlreadyOpen(id)) if id == stream_id));
    assert_eq!(link.stream_id(), Some(stream_id));
    proxy.expect_silence().await;
}

#[tokio::test]
async fn polled_recv_grants_credit() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let mut link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("meter", 1)))
            .await?;
        link.open(OpenOptions::default().polled(true)).await?;
        let data = link.recv().await?;
        Ok::<_, Error>((link, data))
    });

    let link_id = proxy.accept_link().await;
    let (stream_id, polled) = proxy.accept_open(link_id).await;
    assert!(polled);

    let poll = proxy.recv().await;
    assert_eq!(poll.target, stream_id);
    let Some(Content::PollRequest(req)) = &poll.content else {
        panic!("expected PollRequest, got {:?}", poll.content);
    };
    assert_eq!(req.timeout_ms, session.config().poll_timeout_ms);

    proxy
        .send(&Message::new(stream_id, session.source(), DataMessage::new(b"42".to_vec())))
        .await;
    proxy.reply(&poll, PollResponse {}).await;

    let (link, data) = link_task.await.unwrap().unwrap();
    assert_eq!(data.unwrap().payload, b"42");
    assert_eq!(link.stats().bytes_received(), 2);
}

#[tokio::test]
async fn socket_options_roundtrip() {
    let (session, mut proxy) = start(CodecKind::Json);
    let client = session.clone();
    let link_task = tokio::spawn(async move {
        let link = client
            .link(Reference::NULL, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
            .await?;
        link.set_option(Property::option(SocketOption::TcpNodelay, 1))
            .await?;
        link.get_option(SocketOption::TcpNodelay).await
    });

    let link_id = proxy.accept_link().await;
    let set = proxy.recv().await;
    assert_eq!(set.target, link_id);
    let Some(Content::SetOptRequest(req)) = &set.content else {
        panic!("expected SetOptRequest, got {:?}", set.content);
    };
    assert_eq!(req.option_value, Property::option(SocketOption::TcpNodelay, 1));
    proxy.reply(&set, devproxy_proto::SetOptResponse {}).await;

    let get = proxy.recv().await;
    proxy
        .reply(
            &get,
            GetOptResponse {
                option_value: Property::option(SocketOption::TcpNodelay, 1),
            },
        )
        .await;

    assert_eq!(
        link_task.await.unwrap().unwrap(),
        Property::option(SocketOption::TcpNodelay, 1)
    );
}

#[tokio::test]
async fn browse_yields_items_then_done() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let browse_task = tokio::spawn(async move {
        let mut browser = client.browse(Reference::NULL).await?;
        let mut stream = browser.services("_ipp._tcp").await?;
        let mut events = Vec::new();
        while let Some(event) = stream.next().await? {
            events.push(event);
        }
        // Exhausted streams answer immediately without reading.
        assert!(stream.next().await?.is_none());
        Ok::<_, Error>(events)
    });

    let link_id = proxy.accept_link().await;
    let (stream_id, _) = proxy.accept_open(link_id).await;

    let data = proxy.recv().await;
    let Some(Content::Data(payload)) = &data.content else {
        panic!("expected data, got {:?}", data.content);
    };
    let req: BrowseRequest = codec::from_slice(CodecKind::Pack, &payload.payload).unwrap();
    assert_eq!(req.browse_type, BrowseType::Service);

    let mut wire = Vec::new();
    for host in ["printer-a", "printer-b", "printer-c"] {
        let item = BrowseResponse::item(req.handle, SocketAddress::proxy(host, 631));
        wire.extend(codec::to_vec(CodecKind::Pack, &item).unwrap());
    }
    let done = BrowseResponse::marker(req.handle, BrowseFlags::ALL_FOR_NOW);
    wire.extend(codec::to_vec(CodecKind::Pack, &done).unwrap());

    // Split mid-object so the client has to reassemble.
    let (head, tail) = wire.split_at(wire.len() / 2 + 3);
    for chunk in [head, tail] {
        proxy
            .send(&Message::new(stream_id, session.source(), DataMessage::new(chunk.to_vec())))
            .await;
    }

    let events = browse_task.await.unwrap().unwrap();
    assert_eq!(events.len(), 4);
    for (event, host) in events.iter().zip(["printer-a", "printer-b", "printer-c"]) {
        let BrowseEvent::Item(resp) = event else {
            panic!("expected item, got {event:?}");
        };
        assert_eq!(resp.item, SocketAddress::proxy(host, 631));
    }
    assert!(matches!(
        events[3],
        BrowseEvent::Done(flags) if flags.contains(BrowseFlags::ALL_FOR_NOW)
    ));
}

#[tokio::test]
async fn dropping_a_running_browse_sends_cancel() {
    let (session, mut proxy) = start(CodecKind::Pack);
    let client = session.clone();
    let browse_task = tokio::spawn(async move {
        let mut browser = client.browse(Reference::NULL).await?;
        let stream = browser.resolve("historian").await?;
        let handle = stream.handle();
        drop(stream);
        Ok::<_, Error>((browser, handle))
    });

    let link_id = proxy.accept_link().await;
    proxy.accept_open(link_id).await;
    let _start = proxy.recv().await;
    let cancel = proxy.recv().await;

    let (_browser, handle) = browse_task.await.unwrap().unwrap();
    let Some(Content::Data(payload)) = &cancel.content else {
        panic!("expected data, got {:?}", cancel.content);
    };
    let req: BrowseRequest = codec::from_slice(CodecKind::Pack, &payload.payload).unwrap();
    assert_eq!(req.browse_type, BrowseType::Cancel);
    assert_eq!(req.handle, handle);
}
