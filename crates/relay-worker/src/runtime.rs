//! The worker's I/O shell (C5, C6): owns the dealer and control sockets,
//! heartbeats, reconnects on broker loss, and invokes the application
//! handler for each request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_proto::socket_config::{
    create_control_pull, create_control_push, create_dealer_and_connect, DealerSocket, PullSocket, PushSocket,
    ZmqContext,
};
use relay_proto::{control_uri, frames_to_multipart, multipart_to_frames, parse_peer_message, PeerMessage, WorkerMessage};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::handler::RequestHandler;

/// Static parameters for a worker runtime instance.
#[derive(Debug, Clone)]
pub struct WorkerRuntimeConfig {
    pub connect: String,
    pub service: Bytes,
    pub heartbeat_interval: Duration,
    pub heartbeat_liveness: u32,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
}

/// Handle to request an orderly shutdown of a running worker reactor.
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

async fn send_ready<D: DealerSocket>(dealer: &mut D, service: Bytes) -> Result<()> {
    dealer
        .send(frames_to_multipart(&WorkerMessage::Ready { service }.to_frames()))
        .await?;
    Ok(())
}

/// The worker's cooperative reactor: a DEALER socket connected to the broker,
/// a control socket, heartbeat bookkeeping, and the request handler.
/// [`step`](WorkerReactor::step) runs a single `tokio::select!` iteration and
/// [`run`](WorkerReactor::run) loops it, so tests can drive iterations one at
/// a time instead of racing real time with `tokio::time::sleep`.
pub struct WorkerReactor<D: DealerSocket, C: PullSocket> {
    ctx: ZmqContext,
    dealer: D,
    control: C,
    config: WorkerRuntimeConfig,
    handler: Arc<dyn RequestHandler>,
    current_liveness: u32,
    next_heartbeat_at: Instant,
    ticker: tokio::time::Interval,
}

impl<D: DealerSocket, C: PullSocket> WorkerReactor<D, C> {
    async fn new(
        ctx: ZmqContext,
        mut dealer: D,
        control: C,
        config: WorkerRuntimeConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        send_ready(&mut dealer, config.service.clone()).await?;
        let current_liveness = config.heartbeat_liveness;
        let next_heartbeat_at = Instant::now() + config.heartbeat_interval;

        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Ok(WorkerReactor {
            ctx,
            dealer,
            control,
            config,
            handler,
            current_liveness,
            next_heartbeat_at,
            ticker,
        })
    }

    /// Run one iteration: wait for whichever of the control channel, the
    /// dealer socket, or the poll ticker is ready first, handle it, then
    /// reconnect or send a heartbeat as needed.
    ///
    /// Returns `Ok(true)` to keep running, `Ok(false)` when the reactor
    /// should stop (a `TERMINATE` control message, or the control channel
    /// closing).
    pub async fn step(&mut self) -> Result<bool> {
        let mut reconnect_needed = false;

        tokio::select! {
            biased;

            frame = self.control.next() => {
                match frame {
                    Some(Ok(multipart)) => {
                        let frames = multipart_to_frames(multipart);
                        if frames.first().map(|f| f.as_ref()) == Some(b"TERMINATE" as &[u8]) {
                            tracing::debug!("worker reactor received TERMINATE");
                            return Ok(false);
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "control channel receive error"),
                    None => {
                        tracing::debug!("control channel closed, stopping worker reactor");
                        return Ok(false);
                    }
                }
            }

            frame = self.dealer.next() => {
                match frame {
                    Some(Ok(multipart)) => {
                        self.current_liveness = self.config.heartbeat_liveness;
                        let frames = multipart_to_frames(multipart);
                        match parse_peer_message(frames) {
                            Ok(PeerMessage::Worker(WorkerMessage::Heartbeat)) => {}
                            Ok(PeerMessage::Worker(WorkerMessage::Disconnect)) => {
                                tracing::info!("broker asked us to disconnect, reconnecting");
                                reconnect_needed = true;
                            }
                            Ok(PeerMessage::Worker(WorkerMessage::Request { client_addr, body })) => {
                                let reply_body = match self.handler.handle(body).await {
                                    Ok(reply) => reply,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "request handler failed, replying empty");
                                        Vec::new()
                                    }
                                };
                                let reply = WorkerMessage::Reply { client_addr, body: reply_body };
                                if let Err(e) = self.dealer.send(frames_to_multipart(&reply.to_frames())).await {
                                    tracing::warn!(error = %e, "failed to send reply");
                                } else {
                                    self.next_heartbeat_at = Instant::now() + self.config.heartbeat_interval;
                                }
                            }
                            Ok(other) => {
                                tracing::warn!(?other, "unexpected message on worker dealer socket");
                            }
                            Err(e) => tracing::warn!(error = %e, "dropping malformed message"),
                        }
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "dealer receive error"),
                    None => tracing::warn!("dealer socket closed unexpectedly"),
                }
            }

            _ = self.ticker.tick() => {
                if self.current_liveness > 0 {
                    self.current_liveness -= 1;
                }
                if self.current_liveness == 0 {
                    tracing::info!("broker heartbeat liveness exhausted, reconnecting");
                    reconnect_needed = true;
                }
            }
        }

        if reconnect_needed {
            tokio::time::sleep(self.config.reconnect_delay).await;
            self.dealer = create_dealer_and_connect(&self.ctx, &self.config.connect)?;
            send_ready(&mut self.dealer, self.config.service.clone()).await?;
            self.current_liveness = self.config.heartbeat_liveness;
            self.next_heartbeat_at = Instant::now() + self.config.heartbeat_interval;
            return Ok(true);
        }

        if Instant::now() >= self.next_heartbeat_at {
            if let Err(e) = self.dealer.send(frames_to_multipart(&WorkerMessage::Heartbeat.to_frames())).await {
                tracing::warn!(error = %e, "failed to send heartbeat");
            }
            self.next_heartbeat_at = Instant::now() + self.config.heartbeat_interval;
        }

        Ok(true)
    }

    /// Step until told to stop.
    pub async fn run(mut self) -> Result<()> {
        while self.step().await? {}
        Ok(())
    }
}

/// Spawn the worker reactor on its own task.
pub async fn spawn(
    ctx: ZmqContext,
    config: WorkerRuntimeConfig,
    handler: Arc<dyn RequestHandler>,
) -> Result<(JoinHandle<Result<()>>, StopHandle<impl PushSocket>)> {
    let control_id = Uuid::new_v4().to_string();
    let uri = control_uri("worker", &control_id);
    let control_pull = create_control_pull(&ctx, &uri)?;
    let control_push = create_control_push(&ctx, &uri)?;

    let dealer = create_dealer_and_connect(&ctx, &config.connect)?;
    let reactor = WorkerReactor::new(ctx.clone(), dealer, control_pull, config, handler).await?;
    let handle = tokio::spawn(reactor.run());

    Ok((handle, StopHandle { push: control_push }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::Duration;

    use relay_proto::socket_config::create_router_and_bind;
    use relay_proto::{frames_to_multipart as to_multipart, multipart_to_frames as from_multipart};

    use crate::handler::{FnHandler, HandlerError};

    use super::*;

    static NEXT_PORT: AtomicU16 = AtomicU16::new(19_500);

    fn next_endpoint() -> String {
        let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        format!("tcp://127.0.0.1:{port}")
    }

    /// Binds a raw ROUTER socket instead of going through `BrokerState`, so
    /// the worker side is exercised in isolation. Drives `step()` directly
    /// instead of racing `tokio::time::sleep`.
    #[tokio::test]
    async fn step_sends_ready_then_replies_to_a_dispatched_request() {
        let ctx = ZmqContext::new();
        let bind = next_endpoint();
        let mut router = create_router_and_bind(&ctx, &bind).expect("router bind");

        let config = WorkerRuntimeConfig {
            connect: bind,
            service: Bytes::from_static(b"echo"),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_liveness: 3,
            poll_interval: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(50),
        };
        let handler: Arc<dyn RequestHandler> = Arc::new(FnHandler(|body: Vec<Bytes>| async move {
            let mut reply = body;
            reply.push(Bytes::from_static(b"-pong"));
            Ok::<_, HandlerError>(reply)
        }));

        let dealer = create_dealer_and_connect(&ctx, &config.connect).expect("worker dealer");
        let control_id = Uuid::new_v4().to_string();
        let uri = control_uri("worker", &control_id);
        let control_pull = create_control_pull(&ctx, &uri).expect("control pull bind");
        let _control_push = create_control_push(&ctx, &uri).expect("control push connect");

        let mut reactor = WorkerReactor::new(ctx.clone(), dealer, control_pull, config, handler)
            .await
            .expect("reactor construction sends READY");

        let ready_frames = tokio::time::timeout(Duration::from_secs(5), router.next())
            .await
            .expect("router never saw READY")
            .expect("router stream closed")
            .expect("router recv error");
        let mut ready_frames = from_multipart(ready_frames);
        let worker_addr = ready_frames.remove(0);

        let client_addr = Bytes::from_static(b"client-1");
        let request = WorkerMessage::Request {
            client_addr: client_addr.clone(),
            body: vec![Bytes::from_static(b"ping")],
        };
        let mut frames = vec![worker_addr];
        frames.extend(request.to_frames());
        router.send(to_multipart(&frames)).await.expect("dispatch request");

        let reply_frames = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                reactor.step().await.expect("step");
                tokio::select! {
                    frame = router.next() => {
                        if let Some(Ok(multipart)) = frame {
                            return from_multipart(multipart);
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                }
            }
        })
        .await
        .expect("router never received reply");

        let mut reply_frames = reply_frames;
        let _addr = reply_frames.remove(0);
        match parse_peer_message(reply_frames).expect("parse reply") {
            PeerMessage::Worker(WorkerMessage::Reply { client_addr: addr, body }) => {
                assert_eq!(addr, client_addr);
                assert_eq!(body, vec![Bytes::from_static(b"ping"), Bytes::from_static(b"-pong")]);
            }
            other => panic!("expected REPLY, got {other:?}"),
        }
    }
}
