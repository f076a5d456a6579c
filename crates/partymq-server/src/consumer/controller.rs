//! Consumer Controller
//!
//! Single loop that owns the source queue subscription. Each iteration waits
//! for exactly one of: shutdown, a poll tick, or the next delivery. Polls and
//! subscription changes are turned into `ControllerEvent`s and run through the
//! state machine, so start and stop can never interleave.
//!
//! Deliveries are processed inline, one at a time, each settled before the
//! next is read.

use super::key::KeyExtractor;
use super::state::{Action, ConsumerState, ControllerEvent};
use crate::broker::{Broker, BrokerError, Delivery, Publisher, Subscription, CONSUMER_TAG_PREFIX};
use crate::observability::supervision::{RestartPolicy, RestartTracker};
use crate::observability::{events, metrics};
use crate::sender::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type DeliveryOf<B> = <<B as Broker>::Subscription as Subscription>::Delivery;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Source queue to consume
    pub queue: String,
    pub prefetch: u16,
    /// How often client availability is checked
    pub poll_interval: Duration,
    /// Bounds repeated subscribe failures
    pub restart_policy: RestartPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "partymq.q.source".to_string(),
            prefetch: 10,
            poll_interval: Duration::from_secs(10),
            restart_policy: RestartPolicy::default(),
        }
    }
}

/// Outcome of routing a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Routed,
    Requeued,
    NoClients,
}

pub struct ConsumerController<B, P> {
    broker: Arc<B>,
    sender: Arc<Sender<P>>,
    extractor: KeyExtractor,
    config: ConsumerConfig,
    state: ConsumerState,
    state_tx: watch::Sender<ConsumerState>,
    restarts: RestartTracker,
    /// Earliest time the next start may be attempted
    retry_at: Option<Instant>,
}

impl<B: Broker, P: Publisher> ConsumerController<B, P> {
    pub fn new(
        broker: Arc<B>,
        sender: Arc<Sender<P>>,
        extractor: KeyExtractor,
        config: ConsumerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Stopped);
        let restarts = RestartTracker::new(config.restart_policy.clone());
        Self {
            broker,
            sender,
            extractor,
            config,
            state: ConsumerState::Stopped,
            state_tx,
            restarts,
            retry_at: None,
        }
    }

    /// Watch the controller's state.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut subscription: Option<B::Subscription> = None;

        info!(
            queue = %self.config.queue,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Consumer controller started"
        );
        metrics::set_consumer_running(false);

        if *shutdown.borrow() {
            return;
        }

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown.changed() => ControllerEvent::Shutdown,

                _ = poll.tick() => ControllerEvent::Poll {
                    clients_ready: self.sender.ready().await,
                },

                delivery = next_delivery(&mut subscription) => match delivery {
                    Some(Ok(delivery)) => match self.process(delivery).await {
                        // Don't spin on requeued messages until the next tick
                        Processed::NoClients => ControllerEvent::Poll {
                            clients_ready: self.sender.ready().await,
                        },
                        Processed::Routed | Processed::Requeued => continue,
                    },
                    Some(Err(error)) => {
                        warn!(error = %error, "Subscription failed");
                        ControllerEvent::SubscriptionEnded
                    }
                    None => ControllerEvent::SubscriptionEnded,
                },
            };

            match self.state.on(event) {
                None => {}
                Some(Action::Start) => {
                    if let Some(active) = self.start().await {
                        subscription = Some(active);
                    }
                }
                Some(Action::Stop) => {
                    if let Some(active) = subscription.take() {
                        self.cancel(active).await;
                    }
                    self.enter(ConsumerState::Stopped);
                    events::consumer_stopped(&self.config.queue, "no_clients");
                }
                Some(Action::Release) => {
                    subscription = None;
                    self.enter(ConsumerState::Stopped);
                    events::consumer_stopped(&self.config.queue, "subscription_ended");
                }
                Some(Action::Exit) => {
                    if let Some(active) = subscription.take() {
                        self.cancel(active).await;
                        self.enter(ConsumerState::Stopped);
                        events::consumer_stopped(&self.config.queue, "shutdown");
                    }
                    info!("Consumer controller stopped");
                    return;
                }
            }
        }
    }

    /// Subscribe to the source queue. `None` means the attempt failed or is
    /// still backing off and will be retried on a later poll.
    async fn start(&mut self) -> Option<B::Subscription> {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return None;
        }

        let consumer_tag = format!("{CONSUMER_TAG_PREFIX}-{}", Uuid::new_v4());
        match self
            .broker
            .subscribe(&self.config.queue, &consumer_tag, self.config.prefetch)
            .await
        {
            Ok(subscription) => {
                self.restarts.reset();
                self.retry_at = None;
                events::consumer_started(&self.config.queue, &consumer_tag, self.config.prefetch);
                self.enter(ConsumerState::Running);
                Some(subscription)
            }
            Err(error) => match self.restarts.record_restart() {
                Some(backoff) => {
                    warn!(
                        error = %error,
                        attempts = self.restarts.restart_count(),
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to start consumer, will retry"
                    );
                    self.retry_at = Some(Instant::now() + backoff);
                    None
                }
                // Circuit open: no attempts until the failures age out of the window
                None => {
                    let pause = self.config.restart_policy.window;
                    error!(
                        error = %error,
                        pause_secs = pause.as_secs(),
                        "Consumer start attempts exhausted, pausing"
                    );
                    self.retry_at = Some(Instant::now() + pause);
                    None
                }
            },
        }
    }

    async fn cancel(&self, subscription: B::Subscription) {
        if let Err(error) = subscription.cancel().await {
            warn!(error = %error, "Failed to cancel consumer");
        }
    }

    fn enter(&mut self, state: ConsumerState) {
        self.state = state;
        self.state_tx.send_replace(state);
        metrics::set_consumer_running(state.is_running());
    }

    /// Route one delivery and settle it.
    async fn process(&self, delivery: DeliveryOf<B>) -> Processed {
        let key = self.extractor.extract(delivery.headers(), delivery.body());
        let result = self
            .sender
            .send(delivery.body(), delivery.headers().clone(), &key)
            .await;

        let (processed, settled) = match result {
            Ok(_) => (Processed::Routed, delivery.ack().await),
            Err(error) if error.is_no_clients() => {
                debug!(key = %key, "No clients, rejecting message");
                metrics::record_message_requeued("no_clients");
                (Processed::NoClients, delivery.reject_requeue().await)
            }
            Err(error) => {
                warn!(error = %error, key = %key, "Failed to route message, requeueing");
                metrics::record_message_requeued("publish_failed");
                (Processed::Requeued, delivery.nack_requeue().await)
            }
        };

        if let Err(error) = settled {
            warn!(error = %error, "Failed to settle delivery");
        }
        processed
    }
}

async fn next_delivery<S: Subscription>(
    subscription: &mut Option<S>,
) -> Option<Result<S::Delivery, BrokerError>> {
    match subscription {
        Some(active) => active.next_delivery().await,
        None => std::future::pending().await,
    }
}
