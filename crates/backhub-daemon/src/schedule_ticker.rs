//! The schedule ticker.
//!
//! A coarse one-minute timer: fetch this node's sites, enqueue every
//! site whose `next_run_at` has passed, then compute and persist the
//! next occurrence in the site's local zone. Runs missed by more than
//! the catch-up window are rescheduled instead of executed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use backhub_core::error::ErrorKind;
use backhub_entity::schedule::{Schedule, ScheduleFrequency};
use backhub_entity::site::Site;

use crate::client::MasterClient;
use crate::pipeline::engine::{Engine, JobRequest};

/// Tick granularity.
const TICK: Duration = Duration::from_secs(60);

/// Run the ticker until shutdown.
pub async fn run(client: MasterClient, engine: Arc<Engine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK);
    info!("Schedule ticker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Schedule ticker stopped");
                    return;
                }
                continue;
            }
        }

        let sites = match client.my_sites().await {
            Ok(sites) => sites,
            Err(e) => {
                warn!(error = %e, "Could not fetch sites for scheduling");
                continue;
            }
        };

        for site in sites {
            tick_site(&client, &engine, site).await;
        }
    }
}

/// Evaluate one site against the clock.
async fn tick_site(client: &MasterClient, engine: &Engine, site: Site) {
    let schedule = site.schedule();
    if schedule.frequency == ScheduleFrequency::Manual {
        return;
    }
    let now = Utc::now();

    // A site without a computed next run gets one without executing.
    let Some(next_run_at) = site.next_run_at else {
        reschedule(client, &site, &schedule, now).await;
        return;
    };

    if !Schedule::is_due(Some(next_run_at), now) {
        return;
    }

    // Runs the daemon slept through beyond the window are skipped.
    if now - next_run_at > Schedule::catch_up_window() {
        info!(site = %site.name, missed = %next_run_at, "Skipping missed run beyond catch-up window");
        reschedule(client, &site, &schedule, now).await;
        return;
    }

    debug!(site = %site.name, due = %next_run_at, "Schedule due; enqueueing backup");
    match engine.enqueue(JobRequest {
        site_id: site.id,
        epoch: None,
    }) {
        Ok(()) => {}
        Err(e) if e.kind == ErrorKind::Conflict => {
            debug!(site = %site.name, "Already queued; schedule advances anyway");
        }
        Err(e) => {
            warn!(site = %site.name, error = %e, "Could not enqueue scheduled backup");
            return;
        }
    }

    reschedule(client, &site, &schedule, now).await;
}

/// Compute and persist the next occurrence.
async fn reschedule(
    client: &MasterClient,
    site: &Site,
    schedule: &Schedule,
    after: chrono::DateTime<Utc>,
) {
    let next = match schedule.next_run_after(after) {
        Ok(next) => next,
        Err(e) => {
            warn!(site = %site.name, error = %e, "Schedule could not be computed");
            return;
        }
    };
    if let Err(e) = client.update_next_run(site.id, next).await {
        warn!(site = %site.name, error = %e, "Could not persist next run");
    }
}
