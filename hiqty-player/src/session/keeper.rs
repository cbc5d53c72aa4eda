//! Lease renewal task

use std::time::Duration;

use hiqty_core::{Lease, LeaseManager};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Extends a lease on a fixed period until stopped.
///
/// The first failed extension cancels `lost` and ends the task; the caller
/// must stop using the lease at once.
pub struct LeaseKeeper {
    lost: CancellationToken,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl LeaseKeeper {
    pub fn spawn(leases: LeaseManager, lease: Lease, period: Duration) -> Self {
        let lost = CancellationToken::new();
        let stop = CancellationToken::new();

        let handle = tokio::spawn({
            let lost = lost.clone();
            let stop = stop.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        () = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if leases.extend(&lease).await {
                                trace!(lease_key = %lease.key(), "Lease renewed");
                            } else {
                                error!(lease_key = %lease.key(), "Lease lost, stopping playback");
                                lost.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self { lost, stop, handle }
    }

    /// Cancelled once the lease can no longer be proven held
    #[must_use]
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}
