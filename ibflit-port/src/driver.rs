use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use futures::{future::poll_fn, Sink, SinkExt, Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::PollSender;

use ibflit_common::{SimTime, Timed};
use ibflit_wire::{link, Frame};

use crate::{
    Arbiter, DriverOptions, Event, LoadReporter, Outbound, PortController, PortError,
    PortReport, PortResolver, PortStats,
};

/// Drives a [`PortController`] from a channel of timed events.
///
/// The driver resolves once the [`PortHandle`] stops sending events and every outbound message
/// was delivered, yielding the teardown report. A fatal controller error resolves it early.
///
/// Starting batches stays on the synchronous [`PortController`] API; a driven port only sees the
/// confirmations that close them.
pub struct PortDriver<R, A, L = ()> {
    controller: PortController<R, A, L>,
    /// Events from the handle.
    from_handle: mpsc::Receiver<Timed<Event>>,
    /// Outbound messages to the handle.
    to_handle: PollSender<Timed<Outbound>>,
    /// Outbound messages waiting for channel capacity.
    egress: VecDeque<Timed<Outbound>>,
    /// Set once the handle stopped sending.
    inbound_closed: bool,
    span: tracing::Span,
}

impl<R, A, L> PortDriver<R, A, L>
where
    R: PortResolver,
    A: Arbiter,
    L: LoadReporter,
{
    /// Wraps `controller` in a driver, returning it together with the handle that feeds it.
    pub fn new(
        mut controller: PortController<R, A, L>,
        options: DriverOptions,
    ) -> (Self, PortHandle) {
        let (to_driver, from_handle) = mpsc::channel(options.inbound_buffer);
        let (to_handle, from_driver) = mpsc::channel(options.outbound_buffer);

        let port = controller.options().port_num();
        let span = tracing::info_span!(parent: None, "port_driver", port);

        let stats = Arc::clone(controller.stats());
        let egress = controller.drain_outbound().collect();

        let driver = Self {
            controller,
            from_handle,
            to_handle: PollSender::new(to_handle),
            egress,
            inbound_closed: false,
            span,
        };

        let handle = PortHandle {
            tx: PollSender::new(to_driver),
            rx: from_driver,
            pending: VecDeque::new(),
            recv_waker: None,
            stats,
        };

        (driver, handle)
    }
}

impl<R, A, L> PortDriver<R, A, L>
where
    R: PortResolver + Send + Unpin + 'static,
    A: Arbiter + Send + Unpin + 'static,
    L: LoadReporter + Send + Unpin + 'static,
{
    /// Runs the driver on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<PortReport, PortError>> {
        tokio::spawn(self)
    }
}

impl<R, A, L> Future for PortDriver<R, A, L>
where
    R: PortResolver + Unpin,
    A: Arbiter + Unpin,
    L: LoadReporter + Unpin,
{
    type Output = Result<PortReport, PortError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _span = this.span.clone().entered();

        loop {
            // Deliver what is pending before taking new events.
            while !this.egress.is_empty() {
                match this.to_handle.poll_reserve(cx) {
                    Poll::Ready(Ok(())) => {
                        if let Some(outbound) = this.egress.pop_front() {
                            if this.to_handle.send_item(outbound).is_err() {
                                tracing::debug!("Outbound channel closed while sending");
                            }
                        }
                    }
                    Poll::Ready(Err(_)) => {
                        tracing::debug!(
                            dropped = this.egress.len(),
                            "Handle stopped receiving, discarding outbound messages"
                        );
                        this.egress.clear();
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            if this.inbound_closed {
                return Poll::Ready(Ok(this.controller.finish()));
            }

            match this.from_handle.poll_recv(cx) {
                Poll::Ready(Some(Timed { at, inner })) => {
                    if let Err(e) = this.controller.handle(inner, at) {
                        tracing::error!(%at, ?inner, "Fatal port error: {e}");
                        return Poll::Ready(Err(e));
                    }
                    this.egress.extend(this.controller.drain_outbound());

                    continue;
                }
                Poll::Ready(None) => {
                    tracing::debug!("Handle closed, flushing and shutting down");
                    this.inbound_closed = true;

                    continue;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// The caller's end of a [`PortDriver`]: a sink of timed events and a stream of timed outbound
/// messages.
///
/// While the handle waits for room to send an event, it keeps taking outbound messages off the
/// driver and holds them until they are received. Sending every event before receiving anything
/// never stalls the driver. The handle can also be split with [`StreamExt::split`] to send and
/// receive from separate tasks.
pub struct PortHandle {
    tx: PollSender<Timed<Event>>,
    rx: mpsc::Receiver<Timed<Outbound>>,
    /// Outbound messages taken off the driver while waiting to send.
    pending: VecDeque<Timed<Outbound>>,
    /// Waker of the last receive that found nothing.
    recv_waker: Option<Waker>,
    stats: Arc<PortStats>,
}

impl PortHandle {
    /// Sends an event occurring at `at`, waiting for capacity.
    pub async fn send(&mut self, at: SimTime, event: impl Into<Event>) -> Result<(), PortError> {
        SinkExt::send(self, Timed::new(at, event.into())).await
    }

    /// Sends every frame read from a link into the port, until the link ends.
    pub async fn feed<S>(&mut self, mut frames: S) -> Result<(), PortError>
    where
        S: Stream<Item = Result<Frame, link::Error>> + Unpin,
    {
        while let Some(frame) = frames.next().await {
            let event = frame?.map(Event::from);
            poll_fn(|cx| self.poll_reserve(cx)).await?;
            self.tx.send_item(event).map_err(|_| PortError::ChannelClosed)?;
        }

        Ok(())
    }

    /// Receives the next outbound message. `None` once the driver finished and every message was
    /// received.
    pub async fn recv(&mut self) -> Option<Timed<Outbound>> {
        self.next().await
    }

    /// Stops sending events. The driver finishes once it has delivered what is left.
    pub fn close(&mut self) {
        self.tx.close();
    }

    /// The live counters of the driven port.
    pub fn stats(&self) -> &PortStats {
        &self.stats
    }

    /// Reserves room for one event, moving outbound messages aside until there is some.
    fn poll_reserve(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), PortError>> {
        let mut polled_rx = false;
        let poll = loop {
            if let Poll::Ready(res) = self.tx.poll_reserve(cx) {
                break Poll::Ready(res.map_err(|_| PortError::ChannelClosed));
            }

            polled_rx = true;
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(outbound)) => self.pending.push_back(outbound),
                // Both sides are registered for wakeup.
                Poll::Ready(None) | Poll::Pending => break Poll::Pending,
            }
        };

        // The receiver now wakes this task only, hand the wakeup back to a waiting receive.
        if polled_rx {
            if let Some(waker) = self.recv_waker.take() {
                waker.wake();
            }
        }

        poll
    }
}

impl Stream for PortHandle {
    type Item = Timed<Outbound>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(outbound) = self.pending.pop_front() {
            return Poll::Ready(Some(outbound));
        }

        let poll = self.rx.poll_recv(cx);
        if poll.is_pending() {
            self.recv_waker = Some(cx.waker().clone());
        }

        poll
    }
}

impl Sink<Timed<Event>> for PortHandle {
    type Error = PortError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.get_mut().poll_reserve(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Timed<Event>) -> Result<(), Self::Error> {
        self.tx.send_item(item).map_err(|_| PortError::ChannelClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}
