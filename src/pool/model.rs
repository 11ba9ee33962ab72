//! The pool model.
//!

use fxhash::FxHashSet;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{Strategy, StrategyHandler};
use crate::{
    config::PoolConfig,
    key::MtiMapping,
    message::Message,
    multiplexer::{Multiplexer, ResponseListener},
    registry::Registry,
    MuxError,
};

/// How long to wait before scanning the members again when none is usable.
pub const RESCAN_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_secs(1);

/// How long [`MultiplexerPool::send`] waits for a usable member.
pub const SEND_BUDGET: tokio::time::Duration = tokio::time::Duration::from_secs(1);

/// Suffix of the mailbox entry that enables a member when liveness gating is on.
pub const ENABLED_SUFFIX: &str = ".enabled";

/// The name of the mailbox entry enabling the member called `name`.
pub fn enabled_key(name: &str) -> String {
    format!("{name}{ENABLED_SUFFIX}")
}

/// Sleep for one [`RESCAN_INTERVAL`], but never past `deadline`.
///
/// Returns whether there is still time left to scan again.
async fn pause(deadline: tokio::time::Instant) -> bool {
    let now = tokio::time::Instant::now();
    if now >= deadline {
        return false;
    }

    tokio::time::sleep_until((now + RESCAN_INTERVAL).min(deadline)).await;
    tokio::time::Instant::now() < deadline
}

/// Several multiplexers behind one logical endpoint.
///
/// Each call picks one member by the configured [`Strategy`], skipping members that
/// are not usable: disconnected, or, with liveness gating on, not enabled. If no
/// member is usable, the pool rescans every [`RESCAN_INTERVAL`] until the deadline of
/// the call.
pub struct MultiplexerPool<M: Message> {
    config: PoolConfig,
    members: Vec<Arc<Multiplexer<M>>>,
    handler: Option<Arc<dyn StrategyHandler<M>>>,

    /// Mapping the override type codes are compared through.
    mapping: MtiMapping,
    /// The override type codes, mapped.
    override_mtis: FxHashSet<String>,

    /// Where the next rotation starts.
    rotation: AtomicUsize,
}

impl<M: Message> MultiplexerPool<M> {
    /// Create a new pool over the given members, in priority order.
    ///
    /// The member names in the configuration are not consulted; see
    /// [`Self::from_registry`] to resolve them.
    pub fn new(config: PoolConfig, members: Vec<Arc<Multiplexer<M>>>) -> Result<Self, MuxError> {
        if members.is_empty() {
            return Err(MuxError::Misconfigured(format!(
                "Pool {} has no members.",
                config.name
            )));
        }

        let mapping = config.mapping()?;
        let override_mtis = config
            .override_mtis
            .iter()
            .map(|mti| mapping.map(mti))
            .collect();

        logger::debug!(
            "Created pool {name} with {count} members using {strategy}.",
            name = config.name,
            count = members.len(),
            strategy = config.strategy
        );

        Ok(Self {
            config,
            members,
            handler: None,
            mapping,
            override_mtis,
            rotation: AtomicUsize::new(0),
        })
    }

    /// Create a new pool, looking up the configured member names in `registry`.
    pub async fn from_registry(config: PoolConfig, registry: &Registry<M>) -> Result<Self, MuxError> {
        let mut members = Vec::with_capacity(config.members.len());

        for name in &config.members {
            let member = registry.get(name).await.ok_or_else(|| {
                MuxError::Misconfigured(format!(
                    "Pool {pool} refers to unknown multiplexer {name}.",
                    pool = config.name
                ))
            })?;
            members.push(member);
        }

        Self::new(config, members)
    }

    /// Chain method to install a hook that is asked for a member before the strategy.
    pub fn with_strategy_handler(mut self, handler: Arc<dyn StrategyHandler<M>>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Get the name of the pool.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the strategy of the pool.
    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the members, in priority order.
    pub fn members(&self) -> &[Arc<Multiplexer<M>>] {
        &self.members
    }

    /// Check if any member is connected.
    pub async fn is_connected(&self) -> bool {
        for member in &self.members {
            if member.is_connected().await {
                return true;
            }
        }
        false
    }

    /// Check if a member can be given traffic right now.
    pub async fn is_usable(&self, member: &Multiplexer<M>) -> bool {
        if !member.is_connected().await {
            return false;
        }

        if !self.config.check_enabled {
            return true;
        }

        let mailbox = member.mailbox();
        let enabled = enabled_key(member.name());

        match member.ready_indicator_names().first() {
            None => mailbox.contains(&enabled).await,
            Some(ready) => match mailbox.indicator(&enabled).await {
                Some(session) => mailbox.indicator(ready).await.as_deref() == Some(session.as_str()),
                None => false,
            },
        }
    }

    /// Pick the member for `message`, waiting until `deadline` for one to become
    /// usable.
    pub async fn member(
        &self,
        message: &M,
        deadline: tokio::time::Instant,
    ) -> Option<Arc<Multiplexer<M>>> {
        if let Some(member) = self
            .handler
            .as_ref()
            .and_then(|handler| handler.select(self, message, deadline))
        {
            return Some(member);
        }

        match self.config.strategy {
            Strategy::PrimarySecondary => self.first_usable(deadline).await,
            Strategy::RoundRobin => self.next_usable(deadline).await,
            Strategy::RoundRobinWithOverride => match self.override_member(message).await {
                Some(member) => Some(member),
                None => self.next_usable(deadline).await,
            },
            Strategy::SplitByDivisor => match self.split_member(message).await {
                Some(member) => Some(member),
                None => self.next_usable(deadline).await,
            },
        }
    }

    /// The first usable member in priority order.
    async fn first_usable(&self, deadline: tokio::time::Instant) -> Option<Arc<Multiplexer<M>>> {
        loop {
            for member in &self.members {
                if self.is_usable(member).await {
                    return Some(Arc::clone(member));
                }
            }

            if !pause(deadline).await {
                logger::debug!("No usable member in {name}.", name = self.name());
                return None;
            }
        }
    }

    /// The next usable member in rotation. Skipped members advance the rotation too.
    async fn next_usable(&self, deadline: tokio::time::Instant) -> Option<Arc<Multiplexer<M>>> {
        let count = self.members.len();

        loop {
            let start = self.rotation.fetch_add(1, Ordering::Relaxed);

            for offset in 0..count {
                let member = &self.members[(start + offset) % count];
                if self.is_usable(member).await {
                    return Some(Arc::clone(member));
                }
                self.rotation.fetch_add(1, Ordering::Relaxed);
            }

            if !pause(deadline).await {
                logger::debug!("No usable member in {name}.", name = self.name());
                return None;
            }
        }
    }

    /// The member a previous message of the same sequence went through, if `message`
    /// is of a type that has to follow it.
    async fn override_member(&self, message: &M) -> Option<Arc<Multiplexer<M>>> {
        let field = self.config.original_channel_field.as_deref()?;
        let endpoint = message.field(field)?;
        let type_code = message.type_code().ok()?;

        if !self.override_mtis.contains(&self.mapping.map(type_code)) {
            return None;
        }

        let inbound = self
            .config
            .override_endpoints
            .get(endpoint)
            .map(String::as_str)
            .unwrap_or(endpoint);

        let member = self.members.iter().find(|member| member.out_name() == inbound)?;

        if self.is_usable(member).await {
            Some(Arc::clone(member))
        } else {
            logger::debug!("Override member {inbound} is not usable, rotating instead.");
            None
        }
    }

    /// The member selected by the split field modulo the member count.
    async fn split_member(&self, message: &M) -> Option<Arc<Multiplexer<M>>> {
        let field = self.config.split_field.as_deref()?;
        let value = message.field(field)?.trim().parse::<u64>().ok()?;

        let index = (value % self.members.len() as u64) as usize;
        let member = &self.members[index];

        if self.is_usable(member).await {
            Some(Arc::clone(member))
        } else {
            None
        }
    }

    fn no_usable_member(&self) -> MuxError {
        MuxError::NoUsableMember(self.name().to_owned())
    }

    /// Send a request through a member and wait up to `timeout` for its response.
    ///
    /// Time spent waiting for a usable member counts against `timeout`. A zero
    /// timeout sends the message without waiting at all.
    pub async fn request(
        &self,
        message: M,
        timeout: tokio::time::Duration,
    ) -> Result<Option<M>, MuxError> {
        if timeout.is_zero() {
            self.send(message).await?;
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let member = self
            .member(&message, deadline)
            .await
            .ok_or_else(|| self.no_usable_member())?;

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        logger::trace!("Pool {name} routing request to {member}.", name = self.name(), member = member.name());
        member.request(message, remaining).await
    }

    /// Send a request through a member, and deliver its response or expiry to
    /// `listener`.
    ///
    /// Time spent waiting for a usable member counts against `timeout`; a zero
    /// timeout never expires.
    pub async fn request_with_listener(
        &self,
        message: M,
        timeout: tokio::time::Duration,
        listener: Arc<dyn ResponseListener<M>>,
        handback: impl Any + Send,
    ) -> Result<(), MuxError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let member = self
            .member(&message, deadline)
            .await
            .ok_or_else(|| self.no_usable_member())?;

        if timeout.is_zero() {
            return member
                .request_with_listener(message, timeout, listener, handback)
                .await;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            listener.expired(Box::new(handback));
            return Ok(());
        }

        member
            .request_with_listener(message, remaining, listener, handback)
            .await
    }

    /// Send a message through a member without waiting for any response.
    pub async fn send(&self, message: M) -> Result<(), MuxError> {
        let deadline = tokio::time::Instant::now() + SEND_BUDGET;
        let member = self
            .member(&message, deadline)
            .await
            .ok_or_else(|| self.no_usable_member())?;

        member.send(message).await
    }

    /// Write a diagnostic dump of this pool and its members.
    pub async fn dump(&self, out: &mut impl std::io::Write, indent: &str) -> std::io::Result<()> {
        writeln!(
            out,
            "{indent}<pool name=\"{name}\" strategy=\"{strategy}\" connected=\"{connected}\">",
            name = self.name(),
            strategy = self.strategy(),
            connected = self.is_connected().await,
        )?;

        let inner = format!("{indent}  ");
        for member in &self.members {
            member.dump(out, &inner).await?;
        }

        writeln!(out, "{indent}</pool>")
    }
}
