use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::DropGuard;

use crate::{
    Error, ErrorKind, Result, Service, TaskSupervisor,
    task_supervisor::TaskSupervisorGuard,
    tcp::{SocketFixer, serve_connection},
};

/// Serves a [`Service`] over TCP.
///
/// # Examples
///
/// ```rust,no_run
/// # use hprose::{Method, Service, Signature, SocketService};
/// # use std::{net::SocketAddr, str::FromStr};
/// # #[tokio::main]
/// # async fn main() {
/// let mut service = Service::default();
/// service.add_function("ping", Method::sync(Signature::default(), |_| Ok(vec!["pong".into()])));
///
/// let server = SocketService::new(service);
/// let addr = SocketAddr::from_str("127.0.0.1:4321").unwrap();
/// server.listen(addr).await.unwrap();
/// server.join().await;
/// # }
/// ```
pub struct SocketService {
    service: Arc<Service>,
    task_supervisor: TaskSupervisor,
    next_id: Arc<AtomicU64>,
}

impl SocketService {
    /// Freezes `service` and makes socket and connection parameters
    /// available to its functions.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(mut service: Service) -> Self {
        service.set_fixer(SocketFixer);
        Self {
            service: Arc::new(service),
            task_supervisor: TaskSupervisor::create(),
            next_id: Arc::default(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Binds `addr` and accepts connections in the background.
    ///
    /// # Returns
    ///
    /// The bound address, which tells the actual port when `addr` asks for
    /// port 0.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::TcpBindFailed`] if the address cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;

        let guard = self.task_supervisor.start_async_task();
        let accept_loop = self.accept_loop(listener, guard.fork());
        tokio::spawn(async move {
            tracing::info!("start listening: {listener_addr}");
            tokio::select! {
                () = guard.stopped() => {
                    tracing::info!("stop accept loop: {listener_addr}");
                }
                r = accept_loop => {
                    if let Err(e) = r {
                        tracing::error!("accept loop on {listener_addr} failed: {e}");
                    }
                }
            }
        });

        Ok(listener_addr)
    }

    /// Accepts connections from `listener` until it fails or [`stop`](Self::stop)
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::TcpAcceptFailed`] when accepting fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let guard = self.task_supervisor.start_async_task();
        let accept_loop = self.accept_loop(listener, guard.fork());
        tokio::select! {
            () = guard.stopped() => Ok(()),
            r = accept_loop => r,
        }
    }

    /// Serves one already-connected stream to completion, or until
    /// [`stop`](Self::stop) closes it.
    pub async fn serve_conn(&self, stream: TcpStream) {
        let guard = self.task_supervisor.start_async_task();
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        serve_connection(self.service.clone(), stream, id, guard.stop_token()).await;
    }

    /// Stops accepting and closes every connection. Frames already queued
    /// are still written and `on_close` fires for each connection.
    ///
    /// Call [`join`](Self::join) afterwards to wait for the shutdown.
    pub fn stop(&self) {
        self.task_supervisor.stop();
    }

    /// A guard that calls [`stop`](Self::stop) when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.task_supervisor.drop_guard()
    }

    /// Waits until stop was requested and every accept loop and connection
    /// has finished.
    pub async fn join(&self) {
        self.task_supervisor.all_stopped().await;
    }

    fn accept_loop(
        &self,
        listener: TcpListener,
        guard: TaskSupervisorGuard,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let service = self.service.clone();
        let next_id = self.next_id.clone();
        async move {
            loop {
                let (stream, addr) = listener
                    .accept()
                    .await
                    .map_err(|e| Error::new(ErrorKind::TcpAcceptFailed, e.to_string()))?;
                let id = next_id.fetch_add(1, Ordering::AcqRel);
                tracing::debug!("accept connection {id} from {addr}");
                let service = service.clone();
                guard
                    .fork()
                    .spawn(move |stop| serve_connection(service, stream, id, stop));
            }
        }
    }
}

impl std::fmt::Debug for SocketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketService")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
