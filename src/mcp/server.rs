//! A named tool server: lazy connection, tool-list caching and call retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{McpCallResult, McpClient, McpPrompt, McpToolSchema};
use crate::error::{BatonError, Result};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

/// How many times a failed tool call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAttempts {
    /// Retry at most `n` times after the first attempt.
    Bounded(u32),
    Unlimited,
}

impl Default for RetryAttempts {
    fn default() -> Self {
        Self::Bounded(0)
    }
}

/// A tool server attached to an agent.
pub struct McpServer {
    name: String,
    client: Arc<dyn McpClient>,
    cache_tools_list: bool,
    tools_cache: Mutex<Option<Vec<McpToolSchema>>>,
    prompts_cache: Mutex<Option<Vec<McpPrompt>>>,
    /// Held across the handshake so concurrent callers connect once.
    connected: Mutex<bool>,
    retry_attempts: RetryAttempts,
    retry_backoff: Duration,
    call_timeout: Option<Duration>,
    allowed_tools: Option<Vec<String>>,
    blocked_tools: Vec<String>,
}

impl fmt::Debug for McpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("cache_tools_list", &self.cache_tools_list)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

impl McpServer {
    pub fn new(name: impl Into<String>, client: Arc<dyn McpClient>) -> Self {
        Self {
            name: name.into(),
            client,
            cache_tools_list: false,
            tools_cache: Mutex::new(None),
            prompts_cache: Mutex::new(None),
            connected: Mutex::new(false),
            retry_attempts: RetryAttempts::default(),
            retry_backoff: Duration::from_secs(1),
            call_timeout: None,
            allowed_tools: None,
            blocked_tools: Vec::new(),
        }
    }

    /// Keep the first tool and prompt listings until
    /// [`McpServer::invalidate_tools_cache`].
    pub fn with_cache_tools_list(mut self, cache: bool) -> Self {
        self.cache_tools_list = cache;
        self
    }

    pub fn with_retry(mut self, attempts: RetryAttempts, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Only expose these tools.
    pub fn with_allowed_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Never expose these tools.
    pub fn with_blocked_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.blocked_tools = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn connect(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }
        self.client.connect().await?;
        *connected = true;
        tracing::debug!(server = %self.name, "Tool server connected");
        Ok(())
    }

    pub async fn cleanup(&self) -> Result<()> {
        {
            let mut connected = self.connected.lock().await;
            if std::mem::take(&mut *connected) {
                self.client.cleanup().await?;
            }
        }
        self.invalidate_tools_cache().await;
        Ok(())
    }

    /// Tools exposed by this server, after filtering.
    pub async fn list_tools(&self) -> Result<Vec<McpToolSchema>> {
        self.connect().await?;

        let mut cache = self.tools_cache.lock().await;
        let tools = match cache.as_ref() {
            Some(cached) if self.cache_tools_list => cached.clone(),
            _ => {
                let listed = self.client.list_tools().await?;
                if self.cache_tools_list {
                    *cache = Some(listed.clone());
                }
                listed
            }
        };
        drop(cache);

        Ok(tools
            .into_iter()
            .filter(|tool| self.exposes(&tool.name))
            .collect())
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        self.connect().await?;

        let mut cache = self.prompts_cache.lock().await;
        match cache.as_ref() {
            Some(cached) if self.cache_tools_list => Ok(cached.clone()),
            _ => {
                let listed = self.client.list_prompts().await?;
                if self.cache_tools_list {
                    *cache = Some(listed.clone());
                }
                Ok(listed)
            }
        }
    }

    /// Drop cached tool and prompt listings.
    pub async fn invalidate_tools_cache(&self) {
        *self.tools_cache.lock().await = None;
        *self.prompts_cache.lock().await = None;
    }

    /// Call a tool, retrying per the server's policy.
    ///
    /// Failures that survive the retries become [`BatonError::McpUpstream`].
    pub async fn call_tool(&self, tool: &str, arguments: serde_json::Value) -> Result<McpCallResult> {
        self.connect().await?;

        let policy = RetryPolicy {
            max_attempts: match self.retry_attempts {
                RetryAttempts::Bounded(n) => n.saturating_add(1),
                RetryAttempts::Unlimited => u32::MAX,
            },
            initial_backoff: self.retry_backoff,
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        };

        let outcome = policy
            .execute_if(
                |e| !e.aborts_run(),
                || {
                    let call = self.client.call_tool(tool, arguments.clone());
                    async move {
                        match self.call_timeout {
                            Some(timeout) => with_timeout(timeout, call).await,
                            None => call.await,
                        }
                    }
                },
            )
            .await;

        outcome.map_err(|e| {
            if e.aborts_run() {
                return e;
            }
            tracing::warn!(server = %self.name, tool, error = %e, "Tool server call failed");
            BatonError::McpUpstream {
                server: self.name.clone(),
                tool: tool.to_string(),
                message: e.to_string(),
            }
        })
    }

    fn exposes(&self, tool: &str) -> bool {
        let allowed = self
            .allowed_tools
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|name| name == tool));
        allowed && !self.blocked_tools.iter().any(|name| name == tool)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;

    /// Scripted client for server and aggregator tests.
    #[derive(Default)]
    pub(crate) struct MockClient {
        pub tools: Vec<McpToolSchema>,
        pub prompts: Vec<McpPrompt>,
        /// How long a handshake takes.
        pub connect_delay: Duration,
        pub call_plan: StdMutex<VecDeque<Result<McpCallResult>>>,
        pub calls: StdMutex<Vec<(String, serde_json::Value)>>,
        pub list_calls: AtomicUsize,
        pub prompt_calls: AtomicUsize,
        pub connects: AtomicUsize,
        pub cleanups: AtomicUsize,
    }

    impl MockClient {
        pub(crate) fn with_tools(names: &[&str]) -> Self {
            Self {
                tools: names
                    .iter()
                    .map(|name| McpToolSchema::new(*name, serde_json::json!({"type": "object"})))
                    .collect(),
                ..Self::default()
            }
        }

        pub(crate) fn then(self, result: Result<McpCallResult>) -> Self {
            self.call_plan
                .lock()
                .expect("call plan lock should not be poisoned")
                .push_back(result);
            self
        }
    }

    #[async_trait]
    impl McpClient for MockClient {
        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            Ok(())
        }

        async fn cleanup(&self) -> Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_tools(&self) -> Result<Vec<McpToolSchema>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tools.clone())
        }

        async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
            self.prompt_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.prompts.clone())
        }

        async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<McpCallResult> {
            self.calls
                .lock()
                .expect("call log lock should not be poisoned")
                .push((name.to_string(), arguments));
            self.call_plan
                .lock()
                .expect("call plan lock should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| Ok(McpCallResult::text(format!("{name} done"))))
        }
    }
}
