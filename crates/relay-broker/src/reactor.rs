//! The broker's I/O shell (C4, C6): owns the router and control sockets and
//! drives [`BrokerState`] from a single cooperative `tokio` task.

use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_proto::socket_config::{
    create_control_pull, create_control_push, create_router_and_bind, PullSocket, PushSocket, RouterSocket,
    ZmqContext,
};
use relay_proto::{control_uri, frames_to_multipart, multipart_to_frames, parse_peer_message};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::state::BrokerState;

/// Handle used to request an orderly shutdown of a running reactor, from
/// outside the task that owns it - the only thing ever sent across that
/// boundary is the `TERMINATE` control frame.
pub struct StopHandle<P: PushSocket> {
    push: P,
}

impl<P: PushSocket> StopHandle<P> {
    pub async fn stop(mut self) -> Result<()> {
        self.push
            .send(frames_to_multipart(&[Bytes::from_static(b"TERMINATE")]))
            .await?;
        Ok(())
    }
}

/// The broker's cooperative reactor: a ROUTER socket, a control socket, and
/// the state machine they drive. [`step`](BrokerReactor::step) runs a single
/// `tokio::select!` iteration and returns whether to keep going;
/// [`run`](BrokerReactor::run) loops `step` until it returns `false`.
/// Splitting the two means tests can drive the reactor iteration-by-iteration
/// and assert on [`state`](BrokerReactor::state) between steps, instead of
/// racing real time with `tokio::time::sleep`.
pub struct BrokerReactor<R: RouterSocket, C: PullSocket> {
    router: R,
    control: C,
    state: BrokerState,
    ticker: tokio::time::Interval,
}

impl<R: RouterSocket, C: PullSocket> BrokerReactor<R, C> {
    fn new(router: R, control: C, state: BrokerState, poll_interval: Duration) -> Self {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        BrokerReactor {
            router,
            control,
            state,
            ticker,
        }
    }

    /// The state machine this reactor drives. Exposed so tests can assert on
    /// registration/dispatch state between `step` calls.
    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    /// Run one iteration: wait for whichever of the control channel, the
    /// router socket, or the poll ticker is ready first, handle it, then run
    /// the state machine's tick and flush any resulting outbound frames.
    ///
    /// Returns `Ok(true)` to keep running, `Ok(false)` when the reactor
    /// should stop (a `TERMINATE` control message, or either socket closing).
    pub async fn step(&mut self) -> Result<bool> {
        tokio::select! {
            biased;

            frame = self.control.next() => {
                match frame {
                    Some(Ok(multipart)) => {
                        let frames = multipart_to_frames(multipart);
                        if frames.first().map(|f| f.as_ref()) == Some(b"TERMINATE" as &[u8]) {
                            tracing::debug!("broker reactor received TERMINATE");
                            return Ok(false);
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "control channel receive error"),
                    None => {
                        tracing::debug!("control channel closed, stopping broker reactor");
                        return Ok(false);
                    }
                }
            }

            frame = self.router.next() => {
                match frame {
                    Some(Ok(multipart)) => {
                        let mut frames = multipart_to_frames(multipart);
                        if frames.is_empty() {
                            tracing::warn!("router received empty message");
                        } else {
                            let sender_addr = frames.remove(0);
                            match parse_peer_message(frames) {
                                Ok(msg) => self.state.handle_message(sender_addr, msg, Instant::now()),
                                Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
                            }
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "router receive error"),
                    None => {
                        tracing::debug!("router socket closed, stopping broker reactor");
                        return Ok(false);
                    }
                }
            }

            _ = self.ticker.tick() => {}
        }

        self.state.tick(Instant::now());
        for msg in self.state.drain_outbox() {
            let mut frames = vec![msg.addr];
            frames.extend(msg.frames);
            if let Err(e) = self.router.send(frames_to_multipart(&frames)).await {
                tracing::warn!(error = %e, "failed to send outbound frame");
            }
        }

        Ok(true)
    }

    /// Step until told to stop.
    pub async fn run(mut self) -> Result<()> {
        while self.step().await? {}
        Ok(())
    }
}

/// Spawn the broker reactor: binds a ROUTER socket at `bind` and an
/// in-process control PULL socket, then runs the select loop on its own
/// task until told to stop.
pub async fn spawn(
    ctx: ZmqContext,
    bind: &str,
    state: BrokerState,
    poll_interval: Duration,
) -> Result<(JoinHandle<Result<()>>, StopHandle<impl PushSocket>)> {
    let router = create_router_and_bind(&ctx, bind)?;
    let control_id = Uuid::new_v4().to_string();
    let uri = control_uri("broker", &control_id);
    let control_pull = create_control_pull(&ctx, &uri)?;
    let control_push = create_control_push(&ctx, &uri)?;

    let reactor = BrokerReactor::new(router, control_pull, state, poll_interval);
    let handle = tokio::spawn(reactor.run());

    Ok((handle, StopHandle { push: control_push }))
}
