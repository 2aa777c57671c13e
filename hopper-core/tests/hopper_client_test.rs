use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET};
use echo_service_impl::EchoServiceImpl;
use hopper_core::{
    client::{
        CallError, ClientOptions, DynamicCallError, DynamicRequest, DynamicResponse, Failure,
        HopperClient, RequestOptions, RoundRobin,
    },
    grpc::{client::GrpcInvoker, thunk::ThunkCache},
    prost_reflect::DescriptorPool,
};


type EchoInvoker = GrpcInvoker<EchoServiceServer<EchoServiceImpl>>;

fn client_for(service: EchoServiceImpl, options: ClientOptions) -> HopperClient<EchoInvoker> {
    let pool = DescriptorPool::decode(FILE_DESCRIPTOR_SET).unwrap();
    let instances = RoundRobin::new(vec![
        "http://echo-1:50051".parse().unwrap(),
        "http://echo-2:50051".parse().unwrap(),
    ]);

    HopperClient::new(
        GrpcInvoker::from_service(EchoServiceServer::new(service)),
        instances,
        pool,
        options,
    )
}

fn client() -> HopperClient<EchoInvoker> {
    client_for(EchoServiceImpl::default(), ClientOptions::default())
}

fn request(method: &str, body: serde_json::Value) -> DynamicRequest {
    DynamicRequest {
        service: "echo.EchoService".to_string(),
        method: method.to_string(),
        body,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unary() {
    let payload = serde_json::json!({ "message": "hello" });

    let res = client()
        .call(request("UnaryEcho", payload.clone()))
        .await
        .unwrap();

    match res {
        DynamicResponse::Unary(value) => assert_eq!(value, payload),
        DynamicResponse::Streaming(_) => panic!("Received stream response for unary request"),
    };
}

#[tokio::test]
async fn test_server_streaming() {
    let res = client()
        .call(request(
            "ServerStreamingEcho",
            serde_json::json!({ "message": "stream" }),
        ))
        .await
        .unwrap();

    match res {
        DynamicResponse::Streaming(elems) => {
            let results: Vec<_> = elems.into_iter().map(|r| r.unwrap()).collect();

            assert_eq!(results.len(), 3);
            assert_eq!(results[0]["message"], "stream - seq 0");
            assert_eq!(results[1]["message"], "stream - seq 1");
            assert_eq!(results[2]["message"], "stream - seq 2");
        }
        DynamicResponse::Unary(_) => {
            panic!("Received unary response for server streaming request")
        }
    };
}

#[tokio::test]
async fn test_client_streaming() {
    let payload = serde_json::json!([
        { "message": "A" },
        { "message": "B" },
        { "message": "C" }
    ]);

    let res = client()
        .call(request("ClientStreamingEcho", payload))
        .await
        .unwrap();

    match res {
        DynamicResponse::Unary(value) => {
            assert_eq!(value, serde_json::json!({"message": "ABC"}))
        }
        DynamicResponse::Streaming(_) => {
            panic!("Received stream response for client stream request")
        }
    };
}

#[tokio::test]
async fn test_bidirectional_streaming() {
    let payload = serde_json::json!([
        { "message": "Ping" },
        { "message": "Pong" }
    ]);

    let res = client()
        .call(request("BidirectionalEcho", payload))
        .await
        .unwrap();

    match res {
        DynamicResponse::Streaming(elems) => {
            let results: Vec<_> = elems.into_iter().map(|r| r.unwrap()).collect();

            assert_eq!(results.len(), 2);
            assert_eq!(results[0]["message"], "echo: Ping");
            assert_eq!(results[1]["message"], "echo: Pong");
        }
        DynamicResponse::Unary(_) => {
            panic!("Received unary response for bidirectional streaming request")
        }
    };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_unary() {
    let payload = serde_json::json!({ "message": "blocking" });

    let res = client()
        .call(DynamicRequest {
            call_kind: Some("blocking_unary".to_string()),
            ..request("UnaryEcho", payload.clone())
        })
        .await
        .unwrap();

    assert!(matches!(res, DynamicResponse::Unary(value) if value == payload));
}

#[tokio::test]
async fn test_blocking_unary_on_current_thread_runtime_is_rejected() {
    let err = client()
        .call(DynamicRequest {
            call_kind: Some("blocking_unary".to_string()),
            ..request("UnaryEcho", serde_json::json!({ "message": "blocking" }))
        })
        .await
        .unwrap_err();

    let DynamicCallError::Client(err) = err else {
        panic!("expected a client error, got {err:?}");
    };
    assert_eq!(err.status_code, 400);
}

#[tokio::test]
async fn test_retries_until_the_service_recovers() {
    let service = EchoServiceImpl::flaky(2);
    let client = client_for(
        service.clone(),
        ClientOptions {
            default_request_options: RequestOptions {
                max_auto_retries: 2,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let res = client
        .call(request("UnaryEcho", serde_json::json!({ "message": "hi" })))
        .await
        .unwrap();

    assert!(matches!(res, DynamicResponse::Unary(value) if value["message"] == "hi"));
    assert_eq!(service.unary_calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_are_aggregated() {
    let service = EchoServiceImpl::flaky(10);
    let client = client_for(service.clone(), ClientOptions::default());

    let err = client
        .call(DynamicRequest {
            options: Some(RequestOptions {
                max_auto_retries: 1,
                max_auto_retries_next_server: 1,
                serializer_name: None,
            }),
            ..request("UnaryEcho", serde_json::json!({ "message": "hi" }))
        })
        .await
        .unwrap_err();

    let DynamicCallError::Client(err) = err else {
        panic!("expected a client error, got {err:?}");
    };
    assert!(matches!(err.cause, Failure::Aggregate(_)));
    assert_eq!(err.status_code, 400);
    assert_eq!(err.failures().len(), 4);
    assert!(err.failures().iter().all(|f| f.status_code() == Some(503)));
    assert_eq!(service.unary_calls(), 4);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let service = EchoServiceImpl::default();
    let client = client_for(
        service.clone(),
        ClientOptions {
            default_request_options: RequestOptions {
                max_auto_retries: 3,
                max_auto_retries_next_server: 3,
                serializer_name: None,
            },
            ..Default::default()
        },
    );

    let err = client
        .call(request("UnaryEcho", serde_json::json!({ "message": "" })))
        .await
        .unwrap_err();

    let DynamicCallError::Client(err) = err else {
        panic!("expected a client error, got {err:?}");
    };
    assert!(matches!(
        err.cause,
        Failure::Call(CallError::Service {
            status_code: 400,
            ..
        })
    ));
    assert_eq!(service.unary_calls(), 1);
}

#[tokio::test]
async fn test_json_wire_payloads_are_not_protobuf_frames() {
    let service = EchoServiceImpl::default();
    let client = client_for(service.clone(), ClientOptions::default());

    let res = client
        .call(DynamicRequest {
            options: Some(RequestOptions {
                serializer_name: Some("grpc-json".to_string()),
                ..Default::default()
            }),
            ..request("UnaryEcho", serde_json::json!({ "message": "hi" }))
        })
        .await;

    assert!(res.is_err());
    assert_eq!(service.unary_calls(), 0);
}

#[tokio::test]
async fn test_incompatible_call_kind_is_rejected() {
    let err = client()
        .call(DynamicRequest {
            call_kind: Some("async_duplex_streaming".to_string()),
            ..request("UnaryEcho", serde_json::json!({ "message": "hi" }))
        })
        .await
        .unwrap_err();

    let DynamicCallError::Client(err) = err else {
        panic!("expected a client error, got {err:?}");
    };
    assert!(matches!(err.cause, Failure::Call(CallError::Resolve(_))));
    assert_eq!(err.status_code, 400);
}

#[tokio::test]
async fn test_streaming_body_must_be_an_array() {
    let err = client()
        .call(request(
            "ClientStreamingEcho",
            serde_json::json!({ "message": "A" }),
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DynamicCallError::Client(ref e) if matches!(e.cause, Failure::Call(CallError::InvalidInput(_)))
    ));
}

#[tokio::test]
async fn test_unknown_service_and_method() {
    let client = client();

    let err = client
        .call(DynamicRequest {
            service: "echo.Missing".to_string(),
            ..request("UnaryEcho", serde_json::json!({}))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DynamicCallError::ServiceNotFound(name) if name == "echo.Missing"));

    let err = client
        .call(request("Missing", serde_json::json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, DynamicCallError::MethodNotFound(name) if name == "Missing"));
}

#[tokio::test]
async fn test_thunks_are_built_once_per_method_and_call_kind() {
    let thunks: &'static ThunkCache = Box::leak(Box::new(ThunkCache::new()));
    let client = client().with_thunk_cache(thunks);

    for _ in 0..3 {
        client
            .call(request("UnaryEcho", serde_json::json!({ "message": "hi" })))
            .await
            .unwrap();
    }
    client
        .call(request(
            "ServerStreamingEcho",
            serde_json::json!({ "message": "hi" }),
        ))
        .await
        .unwrap();

    assert_eq!(thunks.builds(), 2);
    assert_eq!(thunks.len(), 2);
}

#[test]
fn test_schema_listing() {
    let client = client();

    assert_eq!(client.list_services(), vec!["echo.EchoService".to_string()]);
    assert_eq!(
        client.list_methods("echo.EchoService").unwrap(),
        vec![
            "UnaryEcho".to_string(),
            "ServerStreamingEcho".to_string(),
            "ClientStreamingEcho".to_string(),
            "BidirectionalEcho".to_string(),
        ]
    );
    assert!(client.list_methods("echo.Missing").is_none());
}
