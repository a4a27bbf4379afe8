use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use tokio::{
	sync::watch,
	time::{self as tokio_time, MissedTickBehavior},
};

use fsq_service::{FallbackSearchService, Scheduler};

const PURGE_INTERVAL_SECONDS: u64 = 900;

pub struct WorkerState {
	pub service: Arc<FallbackSearchService>,
	pub scheduler: Scheduler,
}

/// Drives the scheduler and the completed-item purge until `shutdown` resolves. An in-progress
/// tick or purge finishes before this returns.
pub async fn run_worker<F>(state: &WorkerState, shutdown: F)
where
	F: Future<Output = ()>,
{
	let (stop_tx, stop_rx) = watch::channel(false);
	let signal = async move {
		shutdown.await;

		let _ = stop_tx.send(true);
	};

	tokio::join!(
		state.scheduler.run(wait_for_stop(stop_rx.clone())),
		purge_loop(&state.service, stop_rx),
		signal,
	);
}

async fn purge_loop(service: &FallbackSearchService, mut stop: watch::Receiver<bool>) {
	let mut interval = tokio_time::interval(StdDuration::from_secs(PURGE_INTERVAL_SECONDS));

	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = stop.wait_for(|stopped| *stopped) => break,
			_ = interval.tick() => {
				if let Err(err) = service.purge_completed().await {
					tracing::error!(error = %err, "Completed item purge failed.");
				}
			},
		}
	}
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
	let _ = stop.wait_for(|stopped| *stopped).await;
}
