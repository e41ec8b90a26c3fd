use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cabincan_frame::{Filter, Frame};
use cabincan_transport::{create_backend, Backend, BackendKind, BusState, ChannelConfig, Timeout};
use tracing::debug;

use crate::channel::Channel;
use crate::config::RegistryConfig;
use crate::error::{CanError, Result};
use crate::jobs::JobId;
use crate::subscription::SubscriptionId;

struct Active {
    backend: Arc<dyn Backend>,
    channels: Vec<Arc<Channel>>,
    /// Names whose backend open is running outside the lock.
    opening: Vec<String>,
}

/// Transport manager: one backend plus the channels opened on it.
///
/// Lifecycle is `Uninitialized -> init -> Initialized -> dispose ->
/// Uninitialized`. Every verb except `init` fails with `State` while
/// uninitialized, and every per-channel verb fails with `Invalid` for a
/// name that is not open. Dropping the registry disposes it.
pub struct Registry {
    config: RegistryConfig,
    state: Mutex<Option<Active>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Construct and probe the backend for `kind`.
    pub fn init(&self, kind: BackendKind) -> Result<()> {
        let mut state = self.lock();
        if state.is_some() {
            return Err(CanError::state("registry already initialized"));
        }
        let backend = create_backend(kind)?;
        Self::activate(&mut state, backend)
    }

    /// Initialize with a caller-constructed backend.
    pub fn init_with_backend(&self, backend: Box<dyn Backend>) -> Result<()> {
        let mut state = self.lock();
        if state.is_some() {
            return Err(CanError::state("registry already initialized"));
        }
        Self::activate(&mut state, backend)
    }

    fn activate(state: &mut Option<Active>, backend: Box<dyn Backend>) -> Result<()> {
        backend.probe()?;
        debug!(backend = backend.name(), "registry initialized");
        *state = Some(Active {
            backend: Arc::from(backend),
            channels: Vec::new(),
            opening: Vec::new(),
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Name of the active backend, if initialized.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.lock().as_ref().map(|a| a.backend.name())
    }

    /// Close every channel, then release the backend. No-op when
    /// uninitialized.
    pub fn dispose(&self) {
        let Some(active) = self.lock().take() else {
            return;
        };
        for channel in &active.channels {
            channel.close();
        }
        debug!(
            backend = active.backend.name(),
            channels = active.channels.len(),
            "registry disposed"
        );
    }

    /// Open a channel. The backend open (which may configure the link) runs
    /// without the registry lock, so verbs on other channels proceed.
    pub fn open(&self, name: &str, config: &ChannelConfig) -> Result<()> {
        let backend = {
            let mut state = self.lock();
            let active = state
                .as_mut()
                .ok_or_else(|| CanError::state("registry not initialized"))?;
            if name.is_empty() {
                return Err(CanError::invalid("channel name must not be empty"));
            }
            if active.channels.iter().any(|c| c.name() == name)
                || active.opening.iter().any(|n| n == name)
            {
                return Err(CanError::invalid(format!("channel {name} is already open")));
            }
            active.opening.push(name.to_string());
            active.backend.clone()
        };

        let opened = Channel::open(name, backend.clone(), config, self.config.scheduler);

        let mut state = self.lock();
        let active = state
            .as_mut()
            .filter(|active| Arc::ptr_eq(&active.backend, &backend));
        let Some(active) = active else {
            drop(state);
            if let Ok(channel) = opened {
                channel.close();
            }
            return Err(CanError::state(format!(
                "registry disposed while opening {name}"
            )));
        };
        active.opening.retain(|n| n != name);
        active.channels.push(Arc::new(opened?));
        Ok(())
    }

    /// Close one channel. Its subscriptions and jobs are dropped.
    pub fn close(&self, name: &str) -> Result<()> {
        let channel = {
            let mut state = self.lock();
            let active = state
                .as_mut()
                .ok_or_else(|| CanError::state("registry not initialized"))?;
            let index = active
                .channels
                .iter()
                .position(|c| c.name() == name)
                .ok_or_else(|| unknown_channel(name))?;
            active.channels.remove(index)
        };
        channel.close();
        Ok(())
    }

    /// Resolve an open channel by name.
    pub fn channel(&self, name: &str) -> Result<Arc<Channel>> {
        let state = self.lock();
        let active = state
            .as_ref()
            .ok_or_else(|| CanError::state("registry not initialized"))?;
        if name.is_empty() {
            return Err(CanError::invalid("channel name must not be empty"));
        }
        active
            .channels
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| unknown_channel(name))
    }

    /// Names of the open channels, in open order.
    pub fn channels(&self) -> Vec<String> {
        self.lock()
            .as_ref()
            .map(|a| a.channels.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn send(&self, name: &str, frame: &Frame, timeout: Timeout) -> Result<()> {
        self.channel(name)?.send(frame, timeout)
    }

    pub fn recv(&self, name: &str, timeout: Timeout) -> Result<Frame> {
        self.channel(name)?.recv(timeout)
    }

    pub fn subscribe<F>(&self, name: &str, filter: Option<Filter>, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.channel(name)?.subscribe(filter, Arc::new(callback))
    }

    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> Result<()> {
        self.channel(name)?.unsubscribe(id)
    }

    pub fn register_job(&self, name: &str, frame: Frame, period: Duration) -> Result<JobId> {
        self.channel(name)?.register_job(frame, period)
    }

    pub fn register_job_ex<F>(
        &self,
        name: &str,
        frame: Frame,
        period: Duration,
        prepare: F,
    ) -> Result<JobId>
    where
        F: FnMut(&mut Frame) + Send + 'static,
    {
        self.channel(name)?
            .register_job_ex(frame, period, Box::new(prepare))
    }

    pub fn cancel_job(&self, name: &str, id: JobId) -> Result<()> {
        self.channel(name)?.cancel_job(id)
    }

    pub fn recover(&self, name: &str) -> Result<()> {
        self.channel(name)?.recover()
    }

    pub fn status(&self, name: &str) -> Result<BusState> {
        self.channel(name)?.status()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn unknown_channel(name: &str) -> CanError {
    CanError::invalid(format!("channel {name} is not open"))
}
