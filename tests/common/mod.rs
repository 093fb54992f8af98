//! Helpers shared by the integration tests.

use reflector::{app, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Every variable `AppConfig::from_env` reads.
#[allow(dead_code)]
pub const CONFIG_VARS: [&str; 12] = [
    "REFLECTOR_MODE",
    "REFLECTOR_VERSION",
    "REFLECTOR_MAX_BODY_BYTES",
    "REFLECTOR_PROXY_URL",
    "REFLECTOR_PROXY_TIMEOUT_MS",
    "REFLECTOR_TRACE_DIR",
    "REFLECTOR_LOG_STDOUT",
    "REFLECTOR_LOG_SAMPLE_N",
    "LOG_FILE",
    "LOG_MAX_BYTES",
    "LOG_ROTATE_KEEP",
    "LOG_ROTATE_COMPRESS",
];

/// Reflector configuration environment for one test.  Starts with every
/// config variable unset and puts the previous values back on drop.
/// Callers still serialize on a mutex; the process environment is global.
#[allow(dead_code)]
pub struct ConfigEnv {
    saved: Vec<(String, Option<String>)>,
}

#[allow(dead_code)]
impl ConfigEnv {
    pub fn scrubbed() -> Self {
        let mut env = Self { saved: Vec::new() };
        for var in CONFIG_VARS {
            env.unset(var);
        }
        env
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.remember(key);
        std::env::set_var(key, value);
    }

    pub fn unset(&mut self, key: &str) {
        self.remember(key);
        std::env::remove_var(key);
    }

    fn remember(&mut self, key: &str) {
        if self.saved.iter().any(|(k, _)| k == key) {
            return;
        }
        self.saved.push((key.to_string(), std::env::var(key).ok()));
    }
}

impl Drop for ConfigEnv {
    fn drop(&mut self) {
        for (key, original) in self.saved.drain(..).rev() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Serve the router on an ephemeral local port.  Returns the base URL.
#[allow(dead_code)]
pub async fn serve(state: AppState) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}
