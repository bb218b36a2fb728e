//! Run statistics.

use std::time::Duration;

use dispatcher::{MetricsSnapshot, ShutdownReport};
use memory_broker::SettlementRecord;
use observability::DeliveryStatsAggregator;

/// Statistics from one run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Publish and settlement tallies
    pub delivery: DeliveryStatsAggregator,

    /// Dispatcher counters summed over destinations
    pub dispatcher: MetricsSnapshot,

    /// Total duration of the run
    pub duration: Duration,

    /// True if shutdown had to nack in-flight deliveries
    pub forced_shutdown: bool,

    /// Whether every published email was settled before shutdown began
    pub settled_in_time: bool,
}

impl PipelineStats {
    /// Fold the broker's settlement log and the dispatcher's report in
    pub fn absorb(&mut self, settlements: &[SettlementRecord], report: &ShutdownReport) {
        self.dispatcher = report.total();
        self.forced_shutdown = report.forced;

        // drops are acked at the broker, so the ack count comes from the dispatcher
        self.delivery.acked = self.dispatcher.acked;
        self.delivery.dropped = self.dispatcher.dropped;
        for record in settlements {
            if let SettlementRecord::Nacked(reason) = record {
                self.delivery.record_nack(*reason);
            }
        }
    }

    /// Emails settled per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.delivery.settled() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n{}", self.delivery.summary());

        println!("Dispatcher");
        println!("   ├─ Duration: {:.3}s", self.duration.as_secs_f64());
        println!("   ├─ Throughput: {:.2} msg/s", self.throughput());
        println!("   ├─ Received: {}", self.dispatcher.received);
        println!("   ├─ Handler retries: {}", self.dispatcher.retries);
        println!("   ├─ Decode failures: {}", self.dispatcher.decode_failures);
        println!("   ├─ Handlers exhausted: {}", self.dispatcher.exhausted);
        println!("   ├─ Settle failures: {}", self.dispatcher.settle_failures);
        println!("   ├─ Settled before shutdown: {}", self.settled_in_time);
        println!("   └─ Forced shutdown: {}", self.forced_shutdown);
        println!();
    }
}
