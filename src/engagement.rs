//! Engagement subscribes a session to push events for a set of groups.
//!
//! Every engage call carries a sequence number that never goes backwards for
//! a controller. A conflict (another engagement from the same identity in
//! flight) is resolved by re-posting the same request until the platform
//! accepts it; giving up is left to whoever drives the controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use orion_client::{EngageRequest, OrionApi, OrionError, Session};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::groups::GroupSet;

/// Server-side filter on pushed event subtypes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[strum(to_string = "passive")]
    Passive,
    /// `debug` is accepted for older configurations.
    #[default]
    #[strum(to_string = "active", serialize = "debug")]
    #[serde(alias = "debug")]
    Active,
}

pub struct EngagementController {
    api: Arc<dyn OrionApi>,
    last_seqnum: AtomicU64,
    conflict_delay: Duration,
}

/// Result of a successful engagement.
#[derive(Clone)]
pub struct EngagementState {
    pub groups: GroupSet,
    pub verbosity: Verbosity,
    pub seqnum: u64,
    pub disengage: DisengageHandle,
}

impl std::fmt::Debug for EngagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngagementState")
            .field("groups", &self.groups)
            .field("verbosity", &self.verbosity)
            .field("seqnum", &self.seqnum)
            .finish()
    }
}

/// Deferred soft unsubscribe: engages the same session with no groups.
#[derive(Clone)]
pub struct DisengageHandle {
    controller: Arc<EngagementController>,
    session: Session,
    verbosity: Verbosity,
}

impl DisengageHandle {
    pub async fn invoke(self) -> Result<(), SessionError> {
        self.controller
            .engage(&self.session, &GroupSet::new(), self.verbosity)
            .await
            .map(|_| ())
    }
}

impl EngagementController {
    pub fn new(api: Arc<dyn OrionApi>) -> Arc<Self> {
        Self::with_conflict_delay(api, Duration::ZERO)
    }

    /// Wait `delay` between conflict retries instead of re-posting at once.
    pub fn with_conflict_delay(api: Arc<dyn OrionApi>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            api,
            last_seqnum: AtomicU64::new(0),
            conflict_delay: delay,
        })
    }

    /// Next sequence number: wall clock milliseconds, bumped past the last
    /// one handed out.
    pub fn next_seqnum(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut last = self.last_seqnum.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last_seqnum
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    pub async fn engage(
        self: &Arc<Self>,
        session: &Session,
        groups: &GroupSet,
        verbosity: Verbosity,
    ) -> Result<EngagementState, SessionError> {
        let seqnum = self.next_seqnum();
        let request = EngageRequest::event_stream(seqnum, groups.to_vec(), verbosity.as_ref());
        let mut conflicts = 0u32;
        loop {
            match self.api.engage(session, &request).await {
                Ok(_) => {
                    info!(groups = %groups, %verbosity, seqnum, conflicts, "engaged");
                    return Ok(EngagementState {
                        groups: groups.clone(),
                        verbosity,
                        seqnum,
                        disengage: DisengageHandle {
                            controller: Arc::clone(self),
                            session: session.clone(),
                            verbosity,
                        },
                    });
                }
                Err(OrionError::Conflict) => {
                    conflicts += 1;
                    debug!(seqnum, conflicts, "{}, retrying", SessionError::EngagementConflict);
                    if self.conflict_delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(self.conflict_delay).await;
                    }
                }
                Err(err) => {
                    warn!(seqnum, error = %err, "engage failed");
                    return Err(SessionError::Engagement(err));
                }
            }
        }
    }
}
