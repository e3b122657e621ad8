/*
Time-queue primitives shared by the link and memory models.

Everything in the simulator advances in whole cycles.  Instead of blocking, a component stamps the
cycle at which a piece of work becomes visible downstream and checks that stamp again on later
ticks.  This module provides the two building blocks for that style:

    - `TimedServer`: a bounded FIFO with a base latency plus a throughput component expressed in
      bytes-per-cycle.  Used by the fixed-latency reference backends.
    - `SerialChannel`: a serial resource (a physical link) where each transfer starts no earlier
      than the previous one finished, tracked by a single watermark.

When a server cannot immediately accept more work it returns a Backpressure, which hands the
request back so the caller can retry on a later cycle.
*/

use std::collections::VecDeque;

use serde::Deserialize;

pub type Cycle = u64;

// Result of queueing a request with a timed server
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    fn new(issued_at: Cycle, ready_at: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    // Cycle at which the request entered the server.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the server will make the payload available to downstream consumers.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}

// The request carries the payload and metadata that is required to compute the service time
#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
    // Latency added on top of the server's base latency for this request only
    pub extra_latency: Cycle,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self {
            payload,
            size_bytes,
            extra_latency: 0,
        }
    }

    pub fn with_extra_latency(mut self, extra_latency: Cycle) -> Self {
        self.extra_latency = extra_latency;
        self
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

// Reasons why the server rejected a request
#[derive(Debug)]
pub enum Backpressure<T> {
    // The bounded FIFO is full
    QueueFull { request: ServiceRequest<T>, capacity: usize },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Fixed latency added to every request
    pub base_latency: Cycle,
    // Throughput
    pub bytes_per_cycle: u32,
    // Maximum number of outstanding requests the server will accept
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

#[derive(Debug)]
struct Inflight<T> {
    payload: T,
    ticket: Ticket,
}

// Single-lane server that enforces the configured latency/bandwidth budget and keeps track of
// outstanding work using a FIFO.  Transfers are pipelined: only the bandwidth share occupies the
// server, the base latency overlaps with the next request.
#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    inflight: VecDeque<Inflight<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.inflight.len() >= self.config.queue_capacity
    }

    // Attempt to enqueue a request at the provided cycle.
    // Returns a Ticket on success or a Backpressure describing why the request could not be accepted.
    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.is_full() {
            return Err(Backpressure::QueueFull {
                request,
                capacity: self.config.queue_capacity,
            });
        }

        let start = self.busy_until.max(now);
        let service = ceil_div_u64(request.size_bytes as u64, self.config.bytes_per_cycle as u64);
        self.busy_until = start.saturating_add(service);
        let ready_at = self
            .busy_until
            .saturating_add(self.config.base_latency)
            .saturating_add(request.extra_latency);
        let ticket = Ticket::new(now, ready_at, request.size_bytes);

        self.inflight.push_back(Inflight {
            payload: request.payload,
            ticket,
        });

        Ok(ticket)
    }

    // Drain any requests that have completed by "now" and invoke the supplied callback with the
    // results.  Completion is in order: a ready request behind a pending one waits.
    pub fn service_ready<F>(&mut self, now: Cycle, mut callback: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        while self
            .inflight
            .front()
            .is_some_and(|front| front.ticket.is_ready(now))
        {
            if let Some(inflight) = self.inflight.pop_front() {
                callback(ServiceResult {
                    payload: inflight.payload,
                    ticket: inflight.ticket,
                });
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }
}

/// A serial resource that moves one unit at a time.  A unit cannot start before the previous one
/// finished; `watermark` holds the finish cycle of the last scheduled unit.
#[derive(Debug, Clone)]
pub struct SerialChannel {
    bytes_per_cycle: f64,
    watermark: Cycle,
}

impl SerialChannel {
    pub fn new(bytes_per_cycle: f64) -> Self {
        assert!(bytes_per_cycle > 0.0, "serial channel bandwidth must be > 0");
        Self {
            bytes_per_cycle,
            watermark: 0,
        }
    }

    /// Cycles needed to push `bytes` through the channel, at least one.
    pub fn transfer_cycles(&self, bytes: u32) -> Cycle {
        ((bytes as f64 / self.bytes_per_cycle).ceil() as Cycle).max(1)
    }

    /// Schedule a transfer of `bytes` at `now` and return its finish cycle.
    pub fn schedule(&mut self, now: Cycle, bytes: u32) -> Cycle {
        let finish = self.watermark.max(now) + self.transfer_cycles(bytes);
        self.watermark = finish;
        finish
    }

    pub fn watermark(&self) -> Cycle {
        self.watermark
    }
}

fn ceil_div_u64(nom: u64, denom: u64) -> Cycle {
    debug_assert!(denom > 0);
    (nom + denom - 1) / denom
}
