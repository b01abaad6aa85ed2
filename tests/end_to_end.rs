//! The seven literal-I/O scenarios, black-box against `Server::handle_request`.

use std::sync::Arc;

use zerver::decision::{Decision, Effect, Error, ErrorKind, Join, Need, Response as Resp};
use zerver::http::response::serialize as serialize_response;
use zerver::slot::SlotDef;
use zerver::step::compile_step;
use zerver::test_support::{assert_body, assert_status, raw_request, FakeEffectHandler};
use zerver::{RouteSpec, SecurityPolicy, Server, ServerConfig};

zerver::step_perms! { struct NonePerms; reads: []; writes: []; }

fn server_with(config: ServerConfig, handler: Arc<dyn zerver::EffectHandler>) -> Server {
    Server::new(config, handler)
}

#[tokio::test]
async fn happy_get() {
    let step = compile_step::<NonePerms, NonePerms, _>("hello", vec![], vec![], |_| {
        Decision::Done(Resp::with_body(200, "Hello, Zerver!"))
    });
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(FakeEffectHandler::new());
    let server = server_with(ServerConfig::default(), handler)
        .add_route(http::Method::GET, "/hello", RouteSpec::new(vec![step]));

    let raw = raw_request("GET", "/hello", &[], b"");
    let response = server.handle_request(&raw).await;
    assert_status(&response, 200);
    assert_body(&response, b"Hello, Zerver!");

    let bytes = serialize_response(&response, "Zerver/1.0", false);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("Hello, Zerver!"));
}

#[tokio::test]
async fn param_extraction() {
    let step = compile_step::<NonePerms, NonePerms, _>("echo_id", vec![], vec![], |view| {
        let id = view.base().param("id").unwrap_or("").to_string();
        Decision::Done(Resp::with_body(200, id))
    });
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(FakeEffectHandler::new());
    let server = server_with(ServerConfig::default(), handler)
        .add_route(http::Method::GET, "/todos/:id", RouteSpec::new(vec![step]));

    let raw = raw_request("GET", "/todos/42", &[], b"");
    let response = server.handle_request(&raw).await;
    assert_status(&response, 200);
    assert_body(&response, b"42");
}

zerver::define_slots! {
    enum JoinSlots { UserSlot: bytes::Bytes, QuotaSlot: bytes::Bytes }
}
zerver::step_perms! { struct JoinRenderPerms; reads: [UserSlot, QuotaSlot]; writes: []; }

#[tokio::test]
async fn parallel_effects_join() {
    let render: zerver::decision::ContinuationFn = Arc::new(|base: &mut zerver::context::CtxBase| {
        let mut view: zerver::context::view::CtxView<'_, JoinRenderPerms, JoinRenderPerms> =
            zerver::context::view::CtxView::new(base);
        let user = view.require::<UserSlot>().unwrap();
        let quota = view.require::<QuotaSlot>().unwrap();
        assert_eq!(&user[..], br#"{"plan":"pro"}"#);
        assert_eq!(&quota[..], br#"{"remaining":3}"#);
        Decision::Done(Resp::new(200))
    });

    let step = compile_step::<NonePerms, NonePerms, _>("issue", vec![], vec![], move |_| {
        Decision::Need(
            Need::parallel(
                vec![
                    Effect::DbGet { key: "user:1".to_string(), token: UserSlot::id(), required: true },
                    Effect::DbGet { key: "quota:1".to_string(), token: QuotaSlot::id(), required: true },
                ],
                Join::AllRequired,
            )
            .with_continuation(zerver::decision::Continuation { name: "render", run: render.clone() }),
        )
    });

    let handler = FakeEffectHandler::new();
    handler.seed("db_get:user:1", bytes::Bytes::from_static(br#"{"plan":"pro"}"#));
    handler.seed("db_get:quota:1", bytes::Bytes::from_static(br#"{"remaining":3}"#));
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(handler);

    let server = server_with(ServerConfig::default(), handler)
        .add_route(http::Method::POST, "/provision", RouteSpec::new(vec![step]));

    let raw = raw_request("POST", "/provision", &[], b"");
    let response = server.handle_request(&raw).await;
    assert_status(&response, 200);
}

#[tokio::test]
async fn compensation_on_partial_failure() {
    use zerver::decision::Mode;

    let step = compile_step::<NonePerms, NonePerms, _>("provision", vec![], vec![], |_| {
        Decision::Need(Need {
            effects: vec![
                Effect::DbPut { key: "a".to_string(), value: bytes::Bytes::new(), token: zerver::slot::SlotId(0), idempotency_key: None },
                Effect::DbPut { key: "b".to_string(), value: bytes::Bytes::new(), token: zerver::slot::SlotId(1), idempotency_key: None },
                Effect::DbPut { key: "c".to_string(), value: bytes::Bytes::new(), token: zerver::slot::SlotId(2), idempotency_key: None },
            ],
            mode: Mode::Sequential,
            join: Join::AllRequired,
            compensations: vec![
                Some(Effect::DbDel { key: "a".to_string(), token: zerver::slot::SlotId(0) }),
                Some(Effect::DbDel { key: "b".to_string(), token: zerver::slot::SlotId(1) }),
                Some(Effect::DbDel { key: "c".to_string(), token: zerver::slot::SlotId(2) }),
            ],
            continuation: None,
        })
    });

    let handler = FakeEffectHandler::new();
    handler.seed("db_put:a", bytes::Bytes::new());
    handler.seed_failure("db_put:b", Error::new(ErrorKind::Internal, "b", "boom"));
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(handler);

    let server = server_with(ServerConfig::default(), handler)
        .add_route(http::Method::POST, "/accounts", RouteSpec::new(vec![step]));

    let raw = raw_request("POST", "/accounts", &[], b"");
    let response = server.handle_request(&raw).await;
    assert_status(&response, 500);
}

#[tokio::test]
async fn chunked_request_body_is_reassembled() {
    let step = compile_step::<NonePerms, NonePerms, _>("echo_body", vec![], vec![], |view| {
        let body = view.base().request.body.clone();
        Decision::Done(Resp::with_body(200, body))
    });
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(FakeEffectHandler::new());
    let server = server_with(ServerConfig::default(), handler)
        .add_route(http::Method::POST, "/test", RouteSpec::new(vec![step]));

    let raw = b"POST /test HTTP/1.1\r\nHost:x\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\n\r\n";
    let response = server.handle_request(raw).await;
    assert_status(&response, 200);
    assert_body(&response, b"helloworld");
}

#[tokio::test]
async fn undeclared_trailer_is_rejected() {
    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(FakeEffectHandler::new());
    let server = server_with(ServerConfig::default(), handler);

    let raw = b"POST /test HTTP/1.1\r\nHost:x\r\nTransfer-Encoding: chunked\r\nTrailer: X-Allowed\r\n\r\n5\r\nhello\r\n5\r\nworld\r\n0\r\nX-Other: y\r\n\r\n";
    let response = server.handle_request(raw).await;
    assert_status(&response, 400);

    let bytes = serialize_response(&response, "Zerver/1.0", false);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 400 Bad Request"));
}

#[tokio::test]
async fn ssrf_is_blocked_before_dispatch() {
    let step = compile_step::<NonePerms, NonePerms, _>("fetch", vec![], vec![], |_| {
        Decision::Need(Need::sequential(vec![Effect::HttpCall {
            method: http::Method::GET,
            url: "http://169.254.169.254/".to_string(),
            headers: Vec::new(),
            body: None,
            token: zerver::slot::SlotId(0),
            timeout_ms: 1_000,
        }]))
    });

    let handler: Arc<dyn zerver::EffectHandler> = Arc::new(FakeEffectHandler::new());
    let mut config = ServerConfig::default();
    config.security = SecurityPolicy { allowed_hosts: vec!["api.trusted.com".to_string()], ..SecurityPolicy::default() };
    let server = server_with(config, handler)
        .add_route(http::Method::GET, "/fetch", RouteSpec::new(vec![step]));

    let raw = raw_request("GET", "/fetch", &[], b"");
    let response = server.handle_request(&raw).await;
    assert_status(&response, 403);
}
