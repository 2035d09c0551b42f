//! Live server management - migrating, spawning and health checking Django

use std::process::{Child, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::store::ManagePy;

/// Time a server gets to exit after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running `manage.py runserver` process
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Migrate the project and spawn its development server
    pub async fn spawn(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        if config.migrate {
            info!("Applying migrations");
            config
                .project
                .run(["migrate", "--noinput"])
                .await
                .map_err(|e| E2eError::ServerStartup(format!("migrate failed: {}", e)))?;
        }

        info!("Spawning Django server on port {}", port);

        let mut cmd = config.project.command([
            "runserver".to_string(),
            "--noreload".to_string(),
            format!("127.0.0.1:{}", port),
        ]);
        cmd.env("PYTHONUNBUFFERED", "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {} {}: {}",
                config.project.python.display(),
                config.project.manage_py.display(),
                e
            ))
        })?;

        let handle = ServerHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        // Wait for server to be healthy
        handle.wait_for_healthy(config.startup_timeout).await?;

        info!("Server is healthy at {}", base_url);
        Ok(handle)
    }

    /// Poll the admin login page until it answers
    async fn wait_for_healthy(&self, timeout_duration: Duration) -> E2eResult<()> {
        let health_url = format!("{}/admin/login/", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Health check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for server to start...");
                    }
                    // Connection refused is expected while server is starting
                    if !e.is_connect() {
                        warn!("Health check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(200)).await;
        }

        Err(E2eError::ServerHealthCheck(attempts))
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server, yielding to the runtime during the grace period
    pub async fn shutdown(&mut self) -> E2eResult<()> {
        if self.exited() {
            return Ok(());
        }
        if self.terminate() {
            sleep(SHUTDOWN_GRACE).await;
        }
        self.kill();
        Ok(())
    }

    /// Blocking variant of [`ServerHandle::shutdown`], for `Drop`
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.exited() {
            return Ok(());
        }
        if self.terminate() {
            std::thread::sleep(SHUTDOWN_GRACE);
        }
        self.kill();
        Ok(())
    }

    fn exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Ask the server to exit; true if the signal was delivered
    fn terminate(&self) -> bool {
        info!("Stopping server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM).is_ok()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Force kill if still running
    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning the system under test
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub project: ManagePy,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Timeout for server startup
    pub startup_timeout: Duration,

    /// Run `migrate --noinput` before starting
    pub migrate: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            project: ManagePy::default(),
            port: None,
            startup_timeout: Duration::from_secs(30),
            migrate: true,
        }
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
