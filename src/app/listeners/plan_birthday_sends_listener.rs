use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::app::events::user_events::{USER_CREATED, USER_DELETED, USER_UPDATED};
use crate::app::events::{Event, EventListener};
use crate::app::models::user::User;
use crate::app::services::birthday_planner_service::BirthdayPlannerService;

/// Subscribes the planner to recipient lifecycle events.
pub struct PlanBirthdaySendsListener {
    planner: Arc<BirthdayPlannerService>,
}

impl PlanBirthdaySendsListener {
    pub fn new(planner: Arc<BirthdayPlannerService>) -> Self {
        Self { planner }
    }

    fn user_from(payload: &serde_json::Value, field: &str) -> Result<User> {
        let value = payload
            .get(field)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("event payload is missing '{}'", field))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl EventListener for PlanBirthdaySendsListener {
    async fn handle(&self, event: Arc<dyn Event>) -> Result<()> {
        let payload = event.to_json();

        match event.event_name() {
            USER_CREATED => {
                let user = Self::user_from(&payload, "user")?;
                self.planner.on_user_created(&user, Utc::now()).await
            }
            USER_UPDATED => {
                let user = Self::user_from(&payload, "user")?;
                let old_user = Self::user_from(&payload, "old_user")?;
                self.planner
                    .on_user_updated(&user, &old_user, event.trace_id(), Utc::now())
                    .await
            }
            USER_DELETED => {
                // Records stay in place; the worker observes the soft delete
                // at dispatch time.
                tracing::info!(
                    trace_id = %event.trace_id(),
                    "User deleted, scheduled sends left for dispatch-time checks"
                );
                Ok(())
            }
            other => {
                tracing::warn!("PlanBirthdaySendsListener received unexpected event {}", other);
                Ok(())
            }
        }
    }

    fn listener_name(&self) -> &'static str {
        "PlanBirthdaySendsListener"
    }
}
