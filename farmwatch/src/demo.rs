//! Chooses the first screen a user sees.

use crate::backend::Backend;
use crate::model::UserId;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoEntry {
    /// The user owns nothing yet; prompt them to request a farm or sensor.
    NoDataPrompt,
    Tutorial,
    Dashboard,
}

pub fn first_screen(has_data: bool, is_first_time_user: bool) -> DemoEntry {
    match (has_data, is_first_time_user) {
        (false, _) => DemoEntry::NoDataPrompt,
        (true, true) => DemoEntry::Tutorial,
        (true, false) => DemoEntry::Dashboard,
    }
}

/// Read-only ownership check. Errors count as "no data" so onboarding is
/// shown rather than hidden.
pub async fn resolve_entry(backend: &dyn Backend, user: UserId, is_first_time_user: bool) -> DemoEntry {
    first_screen(check_ownership(backend, user).await, is_first_time_user)
}

async fn check_ownership(backend: &dyn Backend, user: UserId) -> bool {
    match backend.has_farms_or_sensors(user).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Ownership check failed for {}, assuming no data: {}", user, e);
            false
        }
    }
}

/// Runs the ownership check once per user and remembers the outcome. The
/// first-time flag is read fresh on every call since the tutorial changes it.
#[derive(Debug, Default)]
pub struct DemoGate {
    checked: Mutex<HashMap<UserId, bool>>,
}

impl DemoGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry(&self, backend: &dyn Backend, user: UserId, is_first_time_user: bool) -> DemoEntry {
        let mut checked = self.checked.lock().await;
        let has_data = match checked.get(&user) {
            Some(&found) => found,
            None => {
                let found = check_ownership(backend, user).await;
                debug!("Ownership for {} resolved to {}", user, found);
                checked.insert(user, found);
                found
            }
        };
        first_screen(has_data, is_first_time_user)
    }
}
