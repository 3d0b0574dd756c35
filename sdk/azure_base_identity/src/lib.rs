#![doc = include_str!("../README.md")]

pub mod agent;
pub mod federation;
pub mod oauth2;
pub mod registry;
pub mod sources;

pub use agent::{AgentHandle, CredentialAgent, CredentialAgentConfig, Prefetch};
pub use registry::CredentialRegistry;
pub use sources::TokenSource;

/// Test utilities shared across modules.
#[cfg(test)]
pub(crate) mod test_utils {
    use tokio::sync::{Mutex, MutexGuard};

    /// Serializes tests that mutate process environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::const_new(());

    pub async fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().await
    }

    pub fn set_env(name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    pub fn remove_env(name: &str) {
        std::env::remove_var(name);
    }
}
