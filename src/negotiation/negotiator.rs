//! Per-family protocol variant negotiation.
//!
//! The backend has shipped several incompatible command body shapes, and the
//! client does not know which one a given deployment speaks. For each command
//! the negotiator tries the family's confirmed variant first (if any), then
//! the remaining candidates in priority order, and caches the first one the
//! backend accepts.
//!
//! | Verdict | Effect |
//! |---------|--------|
//! | accepted | cache (family → variant), return receipt |
//! | rejected | record, try next candidate |
//! | network error | abort the invocation, cache untouched |
//! | all rejected | `NegotiationExhausted`, cache untouched |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Command, CommandFamily, CommandOutcome, CommandReceipt, ProtocolVariant};

use super::cache::VariantCache;
use super::channel::CommandChannel;

// ============================================================================
// Rejection
// ============================================================================

/// One refused attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Variant that was refused.
    pub variant: ProtocolVariant,
    /// HTTP status, when the route has one.
    pub status: Option<u16>,
    /// Backend message (may be empty).
    pub message: String,
}

impl Rejection {
    /// Creates a rejection record.
    #[must_use]
    pub fn new(variant: ProtocolVariant, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            variant,
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} → HTTP {status}", self.variant)?,
            None => write!(f, "{} → refused", self.variant)?,
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

// ============================================================================
// PendingCommand
// ============================================================================

/// Book-keeping for one in-flight invocation.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// The command being delivered.
    pub command: Command,
    /// Variant confirmed for the family when the invocation began.
    pub cached: Option<ProtocolVariant>,
    /// Variants tried so far, in order.
    pub tried: Vec<ProtocolVariant>,
    /// Invocation start.
    pub issued_at: DateTime<Utc>,
}

impl PendingCommand {
    fn new(command: Command, cached: Option<ProtocolVariant>) -> Self {
        Self {
            command,
            cached,
            tried: Vec::with_capacity(3),
            issued_at: Utc::now(),
        }
    }

    /// Family of the command.
    #[inline]
    #[must_use]
    pub fn family(&self) -> CommandFamily {
        self.command.family()
    }

    /// Attempt order: cached variant, then every other candidate.
    #[must_use]
    pub fn plan(&self) -> Vec<ProtocolVariant> {
        self.cached
            .into_iter()
            .chain(
                self.family()
                    .candidates()
                    .iter()
                    .copied()
                    .filter(|variant| Some(*variant) != self.cached),
            )
            .collect()
    }

    /// Milliseconds since the invocation began.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.issued_at).num_milliseconds()
    }
}

// ============================================================================
// CommandNegotiator
// ============================================================================

/// Delivers commands, discovering and caching the accepted wire variant.
#[derive(Clone)]
pub struct CommandNegotiator {
    channel: Arc<dyn CommandChannel>,
    cache: Arc<VariantCache>,
    robot_id: String,
}

impl CommandNegotiator {
    /// Creates a negotiator for `robot_id` over `channel`.
    #[must_use]
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        cache: Arc<VariantCache>,
        robot_id: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            cache,
            robot_id: robot_id.into(),
        }
    }

    /// Shared variant cache.
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<VariantCache> {
        &self.cache
    }

    /// Robot the commands are addressed to.
    #[inline]
    #[must_use]
    pub fn robot_id(&self) -> &str {
        &self.robot_id
    }

    /// Delivers `command`.
    ///
    /// # Errors
    ///
    /// - connection-class errors from the route (nothing cached)
    /// - [`Error::NegotiationExhausted`] when every candidate was refused
    pub async fn execute(&self, command: Command) -> Result<CommandReceipt> {
        let family = command.family();
        let mut pending = PendingCommand::new(command, self.cache.get(family));
        let mut rejections = Vec::new();

        for variant in pending.plan() {
            pending.tried.push(variant);
            let body = variant.encode(&pending.command, &self.robot_id);
            debug!(%command, %variant, attempt = pending.tried.len(), "Submitting command");

            let outcome = match self.channel.submit(body).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%command, %variant, error = %e, "Command delivery failed");
                    return Err(e);
                }
            };

            match outcome {
                CommandOutcome::Accepted(response) => {
                    if pending.cached != Some(variant) {
                        self.cache.confirm(family, variant);
                        info!(%family, %variant, "Backend protocol variant discovered");
                    }
                    debug!(
                        %command,
                        %variant,
                        elapsed_ms = pending.elapsed_ms(),
                        "Command accepted"
                    );
                    return Ok(CommandReceipt {
                        variant,
                        attempts: pending.tried.len(),
                        response,
                    });
                }

                CommandOutcome::Rejected { status, message } => {
                    debug!(%command, %variant, ?status, %message, "Variant refused");
                    rejections.push(Rejection::new(variant, status, message));
                }
            }
        }

        warn!(
            %command,
            tried = pending.tried.len(),
            "Every protocol variant refused"
        );
        Err(Error::negotiation_exhausted(family, rejections))
    }
}

impl fmt::Debug for CommandNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNegotiator")
            .field("cache", &self.cache)
            .field("robot_id", &self.robot_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
