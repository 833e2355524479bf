//! Cron job that folds externally published counters into profile rows.

use std::sync::Arc;

use apalis::prelude::{Data, Error as ApalisError};

use crate::application::cache::ProfileCache;
use crate::application::repos::ProfilesRepo;

/// Marker struct for the cron-triggered counter sweep.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct SyncProfileCountersJob;

impl From<chrono::DateTime<chrono::Utc>> for SyncProfileCountersJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the counter sweep worker.
#[derive(Clone)]
pub struct SyncProfileCountersContext {
    pub profiles: Arc<dyn ProfilesRepo>,
    pub cache: Arc<dyn ProfileCache>,
}

/// Walk every profile owner and copy whatever counters the cache currently
/// holds into the persisted row. Individual failures are logged and skipped
/// so one bad entry cannot stall the sweep.
pub async fn process_sync_profile_counters_job(
    _job: SyncProfileCountersJob,
    ctx: Data<SyncProfileCountersContext>,
) -> Result<(), ApalisError> {
    let owners = match ctx.profiles.list_owners().await {
        Ok(owners) => owners,
        Err(err) => {
            tracing::warn!(error = %err, "counter sweep could not list profiles");
            return Ok(());
        }
    };

    let mut updated = 0usize;
    for owner in owners {
        let counters = match ctx.cache.counters_for(&owner.email).await {
            Ok(Some(counters)) if !counters.is_empty() => counters,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    email = owner.email,
                    "counter sweep cache read failed"
                );
                continue;
            }
        };

        match ctx.profiles.apply_counters(owner.user_id, &counters).await {
            Ok(()) => updated += 1,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    user_id = owner.user_id,
                    "counter sweep update failed"
                );
            }
        }
    }

    if updated > 0 {
        tracing::info!(updated_profiles = updated, "profile counters synced");
    }
    Ok(())
}
