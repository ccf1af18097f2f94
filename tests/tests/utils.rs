use mock_service::MockService;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("stampede=debug,mock_service=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Starts a fresh mock service on an ephemeral port.
#[allow(unused)]
pub async fn mock() -> MockService {
    init();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    mock_service::spawn(addr).await.unwrap()
}

/// An address nothing is listening on.
#[allow(unused)]
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
