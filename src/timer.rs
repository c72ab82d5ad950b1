//! Jittered one-shot timers.
//!
//! A [`Ticker`] describes a period with optional random jitter and mints
//! one-shot [`Timer`]s from it. The robust WebSocket layer uses a ticker to
//! schedule periodic connection refreshes; jitter spreads refreshes of many
//! connections so they do not stampede the server.

use std::{future, pin::Pin, time::Duration};

use rand::Rng;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

/// Random adjustment applied to a ticker's period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Fire exactly on the period.
    #[default]
    None,
    /// Add a uniform random delay in `[0, d)`.
    Plus(Duration),
    /// Subtract a uniform random delay in `[0, d)`, clamped at zero.
    Minus(Duration),
}

/// A one-shot timer factory with period and jitter.
///
/// A ticker whose effective period works out to zero yields a [`Timer`]
/// that never fires, which disables whatever it schedules.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ticker {
    pub period: Duration,
    pub jitter: Jitter,
}

impl Ticker {
    /// A ticker with the given period and no jitter.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            jitter: Jitter::None,
        }
    }

    /// Set the jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Mint a one-shot timer with the jittered period.
    pub fn timer(&self) -> Timer {
        let period = match self.jitter {
            Jitter::None => self.period,
            Jitter::Plus(j) if !j.is_zero() => self.period + random_below(j),
            Jitter::Minus(j) if !j.is_zero() => self.period.saturating_sub(random_below(j)),
            _ => self.period,
        };

        if period.is_zero() {
            Timer::Null
        } else {
            Timer::Armed(Box::pin(tokio::time::sleep(period)))
        }
    }

    /// Run `f` when the timer fires, unless `token` cancels first.
    pub async fn do_on_tick(&self, token: &CancellationToken, f: impl FnOnce()) {
        let mut timer = self.timer();
        tokio::select! {
            _ = token.cancelled() => {}
            _ = timer.tick() => f(),
        }
    }

    /// Run `f` on every tick until `token` cancels.
    pub async fn do_on_every_tick(&self, token: &CancellationToken, mut f: impl FnMut()) {
        while !token.is_cancelled() {
            self.do_on_tick(token, &mut f).await;
        }
    }
}

/// A one-shot timer; the null variant never fires.
pub enum Timer {
    Armed(Pin<Box<Sleep>>),
    Null,
}

impl Timer {
    /// Wait for the tick. Fires at most once; afterwards (and for the null
    /// timer) this pends forever, so it is safe inside a `select!` arm.
    pub async fn tick(&mut self) {
        match self {
            Timer::Armed(sleep) => {
                sleep.as_mut().await;
                *self = Timer::Null;
            }
            Timer::Null => future::pending().await,
        }
    }
}

fn random_below(limit: Duration) -> Duration {
    let nanos = rand::rng().random_range(0..limit.as_nanos().max(1)) as u64;
    Duration::from_nanos(nanos)
}
