#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use hprose::{
    Args, Error, ErrorKind, Filter, FilterHandler, InvokeHandler, Method, MethodOptions,
    NextFilter, NextInvoke, ResultMode, Service, ServiceConfig, ServiceContext, ServiceEvent,
    Signature,
    io::{Value, ValueType},
};

/// Encodes a string of two or more characters the way the wire does.
fn s(text: &str) -> String {
    format!("s{}\"{text}\"", text.encode_utf16().count())
}

fn config(debug: bool) -> ServiceConfig {
    let mut config: ServiceConfig = serde_json::from_str(r#"{"error_delay": "0s"}"#).unwrap();
    config.debug = debug;
    config
}

fn service_with(config: ServiceConfig) -> Service {
    let mut service = Service::new(config);
    service
        .add_function(
            "hello",
            Method::sync(Signature::new([ValueType::String]), |args| {
                Ok(vec![format!("Hello {}!", args.str(0)?).into()])
            }),
        )
        .add_function("noop", Method::sync(Signature::default(), |_| Ok(vec![])))
        .add_function(
            "pair",
            Method::sync(Signature::default(), |_| Ok(vec![1.into(), "ab".into()])),
        )
        .add_function(
            "inc",
            Method::sync(Signature::new([ValueType::Int]), |args| {
                args[0] = Value::Int(args.int(0)? + 1);
                Ok(vec![])
            }),
        )
        .add_function(
            "sum",
            Method::sync(Signature::variadic([], ValueType::Int), |args| {
                Ok(vec![args.iter().filter_map(Value::as_i64).sum::<i64>().into()])
            }),
        )
        .add_function(
            "greet",
            Method::sync(Signature::new([ValueType::String, ValueType::Int]), |args| {
                Ok(vec![format!("{}{}", args.str(0)?, args.int(1)?).into()])
            }),
        )
        .add_function(
            "boom",
            Method::sync(Signature::default(), |_| panic!("boom")),
        );
    service
}

fn service() -> Service {
    service_with(config(false))
}

async fn call_with(service: &Service, ctx: &mut ServiceContext, request: &str) -> String {
    let response = service
        .handle(Bytes::copy_from_slice(request.as_bytes()), ctx)
        .await;
    String::from_utf8(response.to_vec()).unwrap()
}

async fn call(service: &Service, request: &str) -> String {
    call_with(service, &mut ServiceContext::new(), request).await
}

#[tokio::test]
async fn test_result_shapes() {
    let service = service();
    assert_eq!(
        call(&service, r#"Cs5"hello"a1{s5"world"}z"#).await,
        format!("R{}z", s("Hello world!"))
    );
    assert_eq!(call(&service, r#"Cs4"noop"z"#).await, "Rnz");
    assert_eq!(call(&service, r#"Cs4"pair"z"#).await, r#"Ra2{1s2"ab"}z"#);
    assert_eq!(call(&service, r#"Cs5"HELLO"a1{s2"me"}z"#).await, format!("R{}z", s("Hello me!")));
}

#[tokio::test]
async fn test_argument_binding() {
    let service = service();
    assert_eq!(call(&service, r#"Cs3"sum"a3{123}z"#).await, "R6z");
    assert_eq!(call(&service, r#"Cs3"sum"a{}z"#).await, "R0z");
    assert_eq!(call(&service, r#"Cs3"sum"a2{1u2}z"#).await, "R3z");
    // Missing arguments take the defaults of their declared types.
    assert_eq!(call(&service, r#"Cs5"greet"z"#).await, "Ru0z");
    assert_eq!(call(&service, r#"Cs5"greet"a1{s2"hi"}z"#).await, format!("R{}z", s("hi0")));

    let response = call(&service, r#"Cs5"greet"a2{s2"hi"a{}}z"#).await;
    assert_eq!(response, format!("E{}z", s("cannot convert list to Int")));
}

#[tokio::test]
async fn test_method_not_found() {
    let mut service = service();
    assert_eq!(
        call(&service, r#"Cs7"missing"z"#).await,
        format!("E{}z", s("method not found: missing"))
    );

    service.remove("HELLO");
    assert_eq!(
        call(&service, r#"Cs5"hello"a1{s5"world"}z"#).await,
        format!("E{}z", s("method not found: hello"))
    );
}

#[tokio::test]
async fn test_wildcard() {
    let mut service = service();
    service.add_missing_method(Method::missing(|name, args| {
        Ok(vec![format!("{name}:{}", args.len()).into()])
    }));
    assert_eq!(call(&service, r#"Cs3"foo"a2{12}z"#).await, format!("R{}z", s("foo:2")));
    assert_eq!(call(&service, r#"Cs3"Bar"z"#).await, format!("R{}z", s("Bar:0")));
    assert_eq!(call(&service, r#"Cs4"noop"z"#).await, "Rnz");

    let mut ctx = ServiceContext::new();
    call_with(&service, &mut ctx, r#"Cs3"foo"z"#).await;
    assert!(ctx.is_missing_method());
    assert!(ctx.method().is_some_and(|m| m.is_missing()));
    call_with(&service, &mut ctx, r#"Cs4"noop"z"#).await;
    assert!(!ctx.is_missing_method());
}

#[tokio::test]
async fn test_oneway() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut service = service();
    service
        .add_function(
            "notify",
            Method::sync(Signature::new([ValueType::Int]), move |args| {
                let _ = tx.send(args.int(0)?);
                Ok(vec![42.into()])
            })
            .oneway(),
        )
        .add_function(
            "crash",
            Method::sync(Signature::default(), |_| panic!("lost")).oneway(),
        );

    assert_eq!(call(&service, r#"Cs6"notify"a1{7}z"#).await, "Rnz");
    assert_eq!(rx.recv().await, Some(7));
    assert_eq!(call(&service, r#"Cs5"crash"z"#).await, "Rnz");
}

#[tokio::test]
async fn test_oneway_answers_before_completion() {
    let release = Arc::new(tokio::sync::Notify::new());
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut service = service();
    service.add_function(
        "slow",
        Method::future(Signature::default(), {
            let release = release.clone();
            move |_| {
                let release = release.clone();
                let done_tx = done_tx.clone();
                async move {
                    release.notified().await;
                    let _ = done_tx.send(());
                    hprose::Result::Ok(vec![1.into()])
                }
            }
        })
        .oneway(),
    );

    let response = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        call(&service, r#"Cs4"slow"z"#),
    )
    .await
    .unwrap();
    assert_eq!(response, "Rnz");
    assert!(done_rx.try_recv().is_err());

    release.notify_one();
    assert_eq!(done_rx.recv().await, Some(()));
}

#[tokio::test]
async fn test_batch() {
    let service = service();
    let response = call(&service, r#"Cs5"hello"a1{s5"world"}Cs7"missing"Cs4"noop"z"#).await;
    assert_eq!(
        response,
        format!(
            "R{}E{}Rnz",
            s("Hello world!"),
            s("method not found: missing")
        )
    );

    // References do not leak from one frame into the next.
    let response = call(&service, r#"Cs5"hello"a1{s5"world"}Cs5"hello"a1{s5"world"}z"#).await;
    let hello = format!("R{}", s("Hello world!"));
    assert_eq!(response, format!("{hello}{hello}z"));
}

#[tokio::test]
async fn test_by_ref() {
    let mut service = service();
    assert_eq!(call(&service, r#"Cs3"inc"a1{5}tz"#).await, "RnAa1{6}z");
    assert_eq!(call(&service, r#"Cs3"inc"a1{5}z"#).await, "Rnz");
    // Extra arguments are hidden from the function but echoed back.
    assert_eq!(
        call(&service, r#"Cs3"inc"a2{5s2"xy"}tz"#).await,
        r#"RnAa2{6s2"xy"}z"#
    );

    let options = MethodOptions {
        by_ref: false,
        ..Default::default()
    };
    service.add_function(
        "fixed",
        Method::sync(Signature::new([ValueType::Int]), |_| Ok(vec![])).with_options(options),
    );
    assert_eq!(call(&service, r#"Cs5"fixed"a1{5}tz"#).await, "Rnz");
}

#[tokio::test]
async fn test_panic_messages() {
    let service = service();
    assert_eq!(call(&service, r#"Cs4"boom"z"#).await, format!("E{}z", s("boom")));

    let service = service_with(config(true));
    let response = call(&service, r#"Cs4"boom"z"#).await;
    assert!(response.starts_with("Es"));
    assert!(response.contains("\"boom\r\n"));
    assert!(response.ends_with("\"z"));

    // The stack is the one of the panicking function, not of the catch site.
    let mut service = service_with(config(true));
    service.add_function("detonate", Method::sync(Signature::default(), detonate));
    let response = call(&service, r#"Cs8"detonate"z"#).await;
    assert!(response.contains("kaboom\r\n"));
    assert!(response.contains("test_dispatch::detonate"));
}

#[inline(never)]
fn detonate(_: &mut Args) -> hprose::Result<Vec<Value>> {
    panic!("kaboom")
}

#[tokio::test]
async fn test_deeply_nested_arguments() {
    let service = service();
    let request = format!(r#"Cs5"hello"a1{{{}"#, "a1{".repeat(200_000));
    let response = call(&service, &request).await;
    assert!(response.starts_with('E'));
    assert!(response.contains("nesting is deeper than"));

    let request = format!(r#"Cs3"sum"a1{{{}"#, "m1{".repeat(200_000));
    assert!(call(&service, &request).await.starts_with('E'));

    // The service keeps answering afterwards.
    assert_eq!(call(&service, r#"Cs3"sum"a2{12}z"#).await, "R3z");
}

#[tokio::test]
async fn test_function_list() {
    let mut service = Service::new(config(false));
    service
        .add_function("hello", Method::sync(Signature::default(), |_| Ok(vec![])))
        .add_function("noop", Method::sync(Signature::default(), |_| Ok(vec![])));
    assert_eq!(call(&service, "z").await, r#"Fa3{u#s5"hello"s4"noop"}z"#);
}

#[tokio::test]
async fn test_client_id() {
    let service = service();
    let response = call(&service, "Cu#z").await;
    assert!(response.starts_with("Rs36\""));
    assert_eq!(response.len(), 43);
    assert_ne!(call(&service, "Cu#z").await, response);
}

#[tokio::test]
async fn test_wrong_request() {
    let service = service();
    assert_eq!(
        call(&service, "X").await,
        format!("E{}z", s("Wrong Request: \r\nX"))
    );

    let response = call(&service, r#"Cs5"hello"a1{s5"world""#).await;
    assert!(response.starts_with("E"));
    assert!(response.ends_with("z"));

    let response = call(&service, r#"Cs5"hello"a1{s5"world"}x"#).await;
    assert!(response.contains("unexpected tag 'x'"));
}

#[tokio::test]
async fn test_error_delay() {
    let config: ServiceConfig = serde_json::from_str(r#"{"error_delay": "100ms"}"#).unwrap();
    let service = Service::new(config);
    let start = std::time::Instant::now();
    call(&service, "X").await;
    assert!(start.elapsed() >= std::time::Duration::from_millis(100));

    // A failed call inside a valid request is answered immediately.
    let start = std::time::Instant::now();
    call(&service, r#"Cs7"missing"z"#).await;
    assert!(start.elapsed() < std::time::Duration::from_millis(100));
}

#[tokio::test]
async fn test_result_modes() {
    let serialized =
        || -> hprose::Result<Vec<Value>> { Ok(vec![Value::Bytes(Bytes::from_static(b"s2\"hi\""))]) };
    let mut service = service();
    service
        .add_function(
            "ser",
            Method::sync(Signature::new([ValueType::Int]), move |_| serialized())
                .with_mode(ResultMode::Serialized),
        )
        .add_function(
            "raw",
            Method::sync(Signature::new([ValueType::Int]), move |_| serialized())
                .with_mode(ResultMode::Raw),
        )
        .add_function(
            "rawend",
            Method::sync(Signature::default(), |_| {
                Ok(vec![Value::Bytes(Bytes::from_static(b"Rs2\"hi\"z"))])
            })
            .with_mode(ResultMode::RawWithEndTag),
        );

    assert_eq!(call(&service, r#"Cs3"ser"a1{1}tz"#).await, r#"Rs2"hi"Aa1{1}z"#);
    assert_eq!(call(&service, r#"Cs3"raw"a1{1}tz"#).await, r#"Rs2"hi"z"#);
    assert_eq!(call(&service, r#"Cs6"rawend"z"#).await, r#"Rs2"hi"z"#);
    assert_eq!(call(&service, r#"Cs6"rawend"Cs4"noop"z"#).await, r#"Rs2"hi"Rnz"#);
    assert_eq!(call(&service, r#"Cs4"noop"Cs6"rawend"z"#).await, r#"RnRs2"hi"z"#);
}

#[tokio::test]
async fn test_context_fixing() {
    let mut service = service();
    service.add_function(
        "whoami",
        Method::sync(
            Signature::new([ValueType::String, ValueType::Context]),
            |args| {
                let ctx = args
                    .context()
                    .ok_or_else(|| Error::invoke("no context"))?;
                let user = ctx.get("user").and_then(Value::as_str).unwrap_or("nobody");
                let method = if ctx.method().is_some() { "resolved" } else { "unresolved" };
                Ok(vec![format!("{}@{user}/{method}", args.str(0)?).into()])
            },
        ),
    );

    let mut ctx = ServiceContext::new();
    ctx.set("user", "alice");
    assert_eq!(
        call_with(&service, &mut ctx, r#"Cs6"whoami"a1{s2"hi"}z"#).await,
        format!("R{}z", s("hi@alice/resolved"))
    );
    // A client that fills every slot leaves nothing to fix.
    assert_eq!(
        call_with(&service, &mut ctx, r#"Cs6"whoami"a2{s2"hi"n}z"#).await,
        format!("E{}z", s("no context"))
    );
}

struct Reverse;

impl Filter for Reverse {
    fn input_filter(&self, data: Bytes, _: &ServiceContext) -> Bytes {
        data.iter().rev().copied().collect()
    }

    fn output_filter(&self, data: Bytes, _: &ServiceContext) -> Bytes {
        data.iter().rev().copied().collect()
    }
}

struct Record(&'static str, Arc<Mutex<Vec<String>>>);

impl Filter for Record {
    fn input_filter(&self, data: Bytes, _: &ServiceContext) -> Bytes {
        self.1.lock().unwrap().push(format!("in:{}", self.0));
        data
    }

    fn output_filter(&self, data: Bytes, _: &ServiceContext) -> Bytes {
        self.1.lock().unwrap().push(format!("out:{}", self.0));
        data
    }
}

#[tokio::test]
async fn test_filters() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut service = service();
    let a: Arc<dyn Filter> = Arc::new(Record("a", log.clone()));
    service
        .add_filter(a.clone())
        .add_filter(Arc::new(Record("b", log.clone())));
    assert_eq!(call(&service, r#"Cs4"noop"z"#).await, "Rnz");
    assert_eq!(*log.lock().unwrap(), ["in:b", "in:a", "out:a", "out:b"]);

    service.remove_filter(&a);
    assert_eq!(service.filters().len(), 1);
    service.remove_filter_by_index(0);
    assert!(service.filter(0).is_none());

    service.add_filter(Arc::new(Reverse));
    let request: String = r#"Cs4"noop"z"#.chars().rev().collect();
    assert_eq!(call(&service, &request).await, "znR");

    log.lock().unwrap().clear();
    service.set_filters(vec![a]);
    assert_eq!(call(&service, r#"Cs4"noop"z"#).await, "Rnz");
    assert_eq!(*log.lock().unwrap(), ["in:a", "out:a"]);
}

struct Upper;

impl InvokeHandler for Upper {
    fn handle<'a>(
        &'a self,
        name: &'a str,
        args: &'a mut Args,
        ctx: &'a mut ServiceContext,
        next: NextInvoke<'a>,
    ) -> BoxFuture<'a, hprose::Result<Vec<Value>>> {
        Box::pin(async move {
            if name == "noop" {
                return Ok(vec!["short".into()]);
            }
            let results = next.call(name, args, ctx).await?;
            Ok(results
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(s.to_uppercase()),
                    v => v,
                })
                .collect())
        })
    }
}

#[tokio::test]
async fn test_invoke_handler() {
    let mut service = service();
    service.add_invoke_handler(Upper);
    assert_eq!(
        call(&service, r#"Cs5"hello"a1{s5"world"}z"#).await,
        format!("R{}z", s("HELLO WORLD!"))
    );
    assert_eq!(call(&service, r#"Cs4"noop"z"#).await, format!("R{}z", s("short")));
}

struct Ping;

impl FilterHandler for Ping {
    fn handle<'a>(
        &'a self,
        request: Bytes,
        ctx: &'a mut ServiceContext,
        next: NextFilter<'a>,
    ) -> BoxFuture<'a, hprose::Result<Bytes>> {
        Box::pin(async move {
            if &request[..] == b"ping" {
                return Ok(Bytes::from_static(b"pong"));
            }
            next.call(request, ctx).await
        })
    }
}

struct Seen(Arc<Mutex<Vec<Bytes>>>);

impl FilterHandler for Seen {
    fn handle<'a>(
        &'a self,
        request: Bytes,
        ctx: &'a mut ServiceContext,
        next: NextFilter<'a>,
    ) -> BoxFuture<'a, hprose::Result<Bytes>> {
        Box::pin(async move {
            self.0.lock().unwrap().push(request.clone());
            next.call(request, ctx).await
        })
    }
}

#[tokio::test]
async fn test_filter_handlers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut service = service();
    service
        .add_filter(Arc::new(Reverse))
        .add_before_filter_handler(Ping)
        .add_after_filter_handler(Seen(seen.clone()));

    assert_eq!(call(&service, "ping").await, "pong");
    assert!(seen.lock().unwrap().is_empty());

    let request: String = r#"Cs4"noop"z"#.chars().rev().collect();
    assert_eq!(call(&service, &request).await, "znR");
    assert_eq!(*seen.lock().unwrap(), [Bytes::from_static(br#"Cs4"noop"z"#)]);
}

#[derive(Default)]
struct Audit {
    calls: Mutex<Vec<String>>,
}

impl ServiceEvent for Audit {
    fn on_before_invoke(
        &self,
        name: &str,
        _: &Args,
        _: bool,
        _: &ServiceContext,
    ) -> hprose::Result<()> {
        match name {
            "hello" => Err(Error::new(ErrorKind::Rejected, "denied")),
            "noop" => panic!("event boom"),
            _ => Ok(()),
        }
    }

    fn on_after_invoke(
        &self,
        name: &str,
        _: &Args,
        by_ref: bool,
        results: &[Value],
        _: &ServiceContext,
    ) -> hprose::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{name}:{}:{by_ref}", results.len()));
        Ok(())
    }

    fn on_send_error(&self, error: Error, _: &ServiceContext) -> Error {
        Error::new(error.kind, format!("[audit] {}", error.msg))
    }
}

#[tokio::test]
async fn test_events() {
    let audit = Arc::new(Audit::default());
    let mut service = service();
    service.set_event(audit.clone());

    assert_eq!(
        call(&service, r#"Cs5"hello"a1{s5"world"}z"#).await,
        format!("E{}z", s("[audit] denied"))
    );
    assert_eq!(
        call(&service, r#"Cs4"noop"z"#).await,
        format!("E{}z", s("[audit] event boom"))
    );
    assert_eq!(
        call(&service, r#"Cs7"missing"z"#).await,
        format!("E{}z", s("[audit] method not found: missing"))
    );
    assert_eq!(call(&service, r#"Cs4"pair"z"#).await, r#"Ra2{1s2"ab"}z"#);
    assert_eq!(call(&service, r#"Cs3"inc"a1{1}tz"#).await, "RnAa1{2}z");
    assert_eq!(*audit.calls.lock().unwrap(), ["pair:2:false", "inc:0:true"]);
}

#[tokio::test]
async fn test_async_function() {
    let mut service = service();
    service.add_function(
        "later",
        Method::future(Signature::new([ValueType::Int]), |args: Args| async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            hprose::Result::Ok(vec![(args.int(0)? * 2).into()])
        }),
    );
    assert_eq!(call(&service, r#"Cs5"later"a1{i21;}z"#).await, "Ri42;z");
}
