mod api;
mod auth;
mod chat;
mod config;
mod cors;
mod db;
mod dispatch;
mod error;
mod notify;
mod presence;
mod store;
mod validation;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    api::ApiState,
    auth::{jwt::JwtAccessTokenService, middleware::AuthState},
    chat::ChatService,
    config::{LogFormat, ServerConfig},
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    dispatch::EventDispatcher,
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ErrorCode, ServiceError,
    },
    store::ChatStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("CHITCHAT_JWT_SECRET is not set; using the development secret");
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::with_ttl(&config.jwt_secret, config.token_ttl_minutes * 60)
            .context("invalid CHITCHAT_JWT_SECRET")?,
    );
    let store = open_store(&config).await?;
    let backend = store.backend_name();
    let app = build_router(&config, store, jwt_service);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind chat listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, store = backend, "starting chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly")
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<ChatStore> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("CHITCHAT_DATABASE_URL is not set; accounts and chats live in memory only");
        return Ok(ChatStore::memory(config.store_timeout));
    };

    let pool = create_pg_pool(database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to the chat database")?;
    check_pool_health(&pool).await?;
    run_migrations(&pool).await?;
    Ok(ChatStore::postgres(pool, config.store_timeout))
}

fn build_router(
    config: &ServerConfig,
    store: ChatStore,
    jwt_service: Arc<JwtAccessTokenService>,
) -> Router {
    let dispatcher = EventDispatcher::default();
    let chat = ChatService::new(store.clone(), Arc::clone(&jwt_service));
    let auth = AuthState::new(jwt_service, store);

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(auth.clone(), chat.clone(), dispatcher.clone()))
            .merge(api::router(ApiState { chat, dispatcher }, auth)),
        config,
    )
}

fn apply_middleware(router: Router, config: &ServerConfig) -> Router {
    router
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
        .layer(cors::cors_layer(config.cors_origins.as_deref()))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ServiceError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use chitchat_common::protocol::ws::ServerEvent;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    use super::{apply_middleware, build_router};
    use crate::{
        auth::jwt::JwtAccessTokenService, chat::testing::TEST_SECRET, config::ServerConfig,
        store::ChatStore,
    };

    type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn test_config() -> ServerConfig {
        ServerConfig::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }

    fn test_router() -> Router {
        let jwt_service =
            Arc::new(JwtAccessTokenService::new(TEST_SECRET).expect("test jwt service"));
        build_router(&test_config(), ChatStore::for_tests(), jwt_service)
    }

    async fn call(router: &Router, method: Method, uri: &str, token: Option<&str>, body: Value) -> Value {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build");
        let response = router.clone().oneshot(request).await.expect("request should complete");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn account(router: &Router, username: &str) -> String {
        let email = format!("{username}@example.com");
        call(
            router,
            Method::POST,
            "/signup",
            None,
            json!({ "username": username, "email": email, "password": "correct horse" }),
        )
        .await;
        let token = call(
            router,
            Method::POST,
            "/signin",
            None,
            json!({ "email": email, "password": "correct horse" }),
        )
        .await;
        token["access_token"].as_str().expect("token").to_owned()
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("server should run");
        });
        addr
    }

    async fn next_event(socket: &mut Socket) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("event should arrive")
                .expect("socket should stay open")
                .expect("frame should be valid");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("server event");
            }
        }
    }

    async fn connect(addr: SocketAddr, token: &str) -> Socket {
        let (mut socket, _) =
            connect_async(format!("ws://{addr}/ws")).await.expect("websocket should connect");
        let hello = json!({ "event": "hello", "data": { "token": token } });
        socket.send(Message::Text(hello.to_string().into())).await.expect("send hello");
        socket
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn error_bodies_carry_the_request_id() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header("x-request-id", "req-401")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should complete");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["error"]["request_id"], "req-401");
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)), &test_config());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let config = test_config();
        let oversized_body = "a".repeat(config.max_body_bytes + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)), &config);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn websocket_session_receives_counts_and_messages() {
        let router = test_router();
        let alice = account(&router, "alice").await;
        let bob = account(&router, "bob").await;
        call(&router, Method::POST, "/requests", Some(&alice), json!({ "toUsername": "bob" }))
            .await;

        let addr = serve(router.clone()).await;
        let mut bob_socket = connect(addr, &bob).await;
        assert_eq!(next_event(&mut bob_socket).await, ServerEvent::NotificationsCount { count: 1 });

        call(
            &router,
            Method::POST,
            "/requests/accept",
            Some(&bob),
            json!({ "requesterUsername": "alice" }),
        )
        .await;
        assert_eq!(next_event(&mut bob_socket).await, ServerEvent::NotificationsCount { count: 0 });
        assert_eq!(
            next_event(&mut bob_socket).await,
            ServerEvent::FriendAdded { friend_username: "alice".into() }
        );

        call(&router, Method::POST, "/chat/bob/send", Some(&alice), json!({ "text": "hi" })).await;
        assert_eq!(
            next_event(&mut bob_socket).await,
            ServerEvent::ChatUnseenUpdate { friend_username: "alice".into(), unseen_count: 1 }
        );
        let ServerEvent::MessageNew { from, message, .. } = next_event(&mut bob_socket).await else {
            panic!("expected message:new");
        };
        assert_eq!((from.as_str(), message.text.as_str(), message.image), ("alice", "hi", false));

        let read = json!({ "event": "chat_read", "data": { "me": "bob", "friend": "alice" } });
        bob_socket.send(Message::Text(read.to_string().into())).await.expect("send chat_read");
        assert_eq!(
            next_event(&mut bob_socket).await,
            ServerEvent::ChatUnseenUpdate { friend_username: "alice".into(), unseen_count: 0 }
        );
    }

    #[tokio::test]
    async fn websocket_with_invalid_token_gets_error_and_close() {
        let addr = serve(test_router()).await;
        let mut socket = connect(addr, "not-a-jwt").await;

        let ServerEvent::Error { code, retryable, .. } = next_event(&mut socket).await else {
            panic!("expected error event");
        };
        assert_eq!(code, "AUTH_INVALID_TOKEN");
        assert!(!retryable);

        let next = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("socket should close");
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    }
}
