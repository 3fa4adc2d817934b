//! Background eviction loops: age-based retention reaping and
//! capacity-based eviction.

use crate::node::store::now_ms;
use crate::node::AggregationContext;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

/// Retention reaper task: every tick, removes records whose age since last
/// update exceeds the TTL. Exits cleanly (without a final save) once the
/// shutdown signal fires.
pub(crate) async fn retention_reaper_task(
    ctx: std::sync::Arc<AggregationContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    pf_debug!("retention reaper task spawned");

    let mut interval = time::interval(ctx.config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                reap_expired(&ctx).await;
            },

            _ = shutdown.changed() => break,
        }
    }

    pf_debug!("retention reaper task exited");
}

/// One reaper pass: removes every record older than the TTL, saving the
/// backup after each removal.
pub(crate) async fn reap_expired(ctx: &AggregationContext) {
    let now = now_ms();
    for (id, record) in ctx.store.snapshot() {
        if now - record.last_update > ctx.config.ttl_ms as i64 {
            ctx.store.remove(&id);
            ctx.backup.save(&ctx.store).await;
            pf_info!("removed expired station '{}'", id);
        }
    }
}

/// Capacity evictor task: every tick, brings the store back under capacity
/// by dropping minimum-lamport records. Exits cleanly once the shutdown
/// signal fires.
pub(crate) async fn capacity_evictor_task(
    ctx: std::sync::Arc<AggregationContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    pf_debug!("capacity evictor task spawned");

    let mut interval = time::interval(ctx.config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                evict_over_capacity(&ctx).await;
            },

            _ = shutdown.changed() => break,
        }
    }

    pf_debug!("capacity evictor task exited");
}

/// One evictor pass: while the store exceeds capacity, removes the record
/// with the smallest lamport stamp (ties broken by scan order), saving the
/// backup after each removal. The scan is not atomic with concurrent puts;
/// a burst of PUTs may transiently overshoot capacity until the next pass.
pub(crate) async fn evict_over_capacity(ctx: &AggregationContext) {
    while ctx.store.len() > ctx.config.capacity {
        let mut victim: Option<(String, i64)> = None;
        for (id, record) in ctx.store.snapshot() {
            match victim {
                Some((_, smallest)) if record.lamport >= smallest => {}
                _ => victim = Some((id, record.lamport)),
            }
        }

        let Some((id, _)) = victim else {
            break;
        };
        ctx.store.remove(&id);
        ctx.backup.save(&ctx.store).await;
        pf_info!("removed station '{}' over capacity limit", id);
    }
}
