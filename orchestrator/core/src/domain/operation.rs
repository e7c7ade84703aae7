// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-Running Operation Poller
//!
//! ```text
//! Submitted ──poll──► Polling{attempts} ──poll──► Terminal{succeeded}
//!                         │   ▲
//!                         └───┘ in progress (sleep poll_frequency)
//! ```
//!
//! The first poll happens immediately after submission; later polls are
//! spaced by the configured frequency and the sleep between them is raced
//! against the caller's [`RequestContext`].

use crate::domain::cloud::{BoxedOperation, PollStatus};
use crate::domain::context::RequestContext;
use crate::domain::errors::CloudError;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_POLL_FREQUENCY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Submitted,
    Polling { attempts: u32 },
    Terminal { succeeded: bool },
}

pub struct Poller<T> {
    operation: BoxedOperation<T>,
    frequency: Duration,
    state: PollerState,
    attempts: u32,
    description: String,
}

impl<T: Send> Poller<T> {
    pub fn new(
        operation: BoxedOperation<T>,
        frequency: Duration,
        description: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            frequency,
            state: PollerState::Submitted,
            attempts: 0,
            description: description.into(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Polls issued so far, including the terminal one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Issue one poll and advance the state machine.
    pub async fn poll_once(&mut self, ctx: &RequestContext) -> Result<Option<T>, CloudError> {
        if let PollerState::Terminal { .. } = self.state {
            return Err(CloudError::Decode(format!(
                "operation {} already reached a terminal state",
                self.description
            )));
        }

        self.attempts += 1;
        let attempts = self.attempts;

        match ctx.run(self.operation.poll()).await {
            Ok(PollStatus::InProgress) => {
                self.state = PollerState::Polling { attempts };
                debug!(
                    operation = %self.description,
                    attempts, "operation still in progress"
                );
                Ok(None)
            }
            Ok(PollStatus::Succeeded(value)) => {
                self.state = PollerState::Terminal { succeeded: true };
                debug!(operation = %self.description, attempts, "operation succeeded");
                Ok(Some(value))
            }
            Err(e) => {
                self.state = PollerState::Terminal { succeeded: false };
                Err(e)
            }
        }
    }

    /// Poll until the operation is terminal or the context fires.
    pub async fn poll_until_done(&mut self, ctx: &RequestContext) -> Result<T, CloudError> {
        loop {
            if let Some(value) = self.poll_once(ctx).await? {
                return Ok(value);
            }
            ctx.sleep(self.frequency).await?;
        }
    }
}
