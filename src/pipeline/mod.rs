//! The message pipeline: an ordered chain of processors that decide
//! expiration, delay, and delivery-attempt outcomes before a message is
//! allowed through to the router.
//!
//! Processors stay side-effect free — `process` only classifies a message —
//! so the topic façade is the single place that actually divert messages to
//! the DLQ or the delayed queue.

use crate::message::{DlqReason, MessageMetadata};

/// What the pipeline decided should happen to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// No processor diverted the message; proceed to routing.
    PassThrough,
    /// A processor diverted the message to the DLQ.
    DeadLetter(DlqReason),
    /// The `DelayProcessor` says this message isn't ready yet.
    Delay { ready_at: i64 },
}

impl PipelineOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::PassThrough)
    }
}

trait Processor: Send + Sync {
    fn process(&self, meta: &MessageMetadata, now: i64) -> Option<PipelineOutcome>;
}

struct ExpirationProcessor;

impl Processor for ExpirationProcessor {
    fn process(&self, meta: &MessageMetadata, now: i64) -> Option<PipelineOutcome> {
        meta.is_expired(now).then_some(PipelineOutcome::DeadLetter(DlqReason::Expired))
    }
}

struct DelayProcessor;

impl Processor for DelayProcessor {
    fn process(&self, meta: &MessageMetadata, now: i64) -> Option<PipelineOutcome> {
        if meta.is_delayed(now) {
            meta.ready_at().map(|ready_at| PipelineOutcome::Delay { ready_at })
        } else {
            None
        }
    }
}

struct AttemptsProcessor {
    max_delivery_attempts: u32,
}

impl Processor for AttemptsProcessor {
    fn process(&self, meta: &MessageMetadata, _now: i64) -> Option<PipelineOutcome> {
        meta.exceeds_attempts(self.max_delivery_attempts)
            .then_some(PipelineOutcome::DeadLetter(DlqReason::MaxAttempts))
    }
}

/// An ordered chain of processors: Expiration, then Delay, then (when
/// configured) Attempts. The first processor to report a diversion wins.
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
}

impl Pipeline {
    pub fn new(max_delivery_attempts: Option<u32>) -> Self {
        let mut processors: Vec<Box<dyn Processor>> = vec![Box::new(ExpirationProcessor), Box::new(DelayProcessor)];
        if let Some(max_delivery_attempts) = max_delivery_attempts {
            processors.push(Box::new(AttemptsProcessor { max_delivery_attempts }));
        }
        Self { processors }
    }

    pub fn process(&self, meta: &MessageMetadata, now: i64) -> PipelineOutcome {
        for processor in &self.processors {
            if let Some(outcome) = processor.process(meta, now) {
                return outcome;
            }
        }
        PipelineOutcome::PassThrough
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::MessageMetadataBuilder;

    fn meta() -> MessageMetadata {
        MessageMetadataBuilder::new(1, 1, "orders", 4).build()
    }

    #[test]
    fn passes_through_a_plain_message() {
        let pipeline = Pipeline::new(None);
        let m = meta();
        assert_eq!(pipeline.process(&m, m.ts + 10), PipelineOutcome::PassThrough);
    }

    #[test]
    fn expiration_dominates_everything_else() {
        let pipeline = Pipeline::new(Some(1));
        let mut m = meta();
        m.ttl = Some(10);
        assert_eq!(pipeline.process(&m, m.ts + 20), PipelineOutcome::DeadLetter(DlqReason::Expired));
    }

    #[test]
    fn delay_wins_over_attempts_when_not_expired() {
        let pipeline = Pipeline::new(Some(1));
        let mut m = meta();
        m.ttd = Some(500);
        m.attempts = m.attempts.incremented().incremented();
        let outcome = pipeline.process(&m, m.ts + 10);
        assert_eq!(outcome, PipelineOutcome::Delay { ready_at: m.ts + 500 });
    }

    #[test]
    fn attempts_processor_only_runs_when_configured() {
        let mut m = meta();
        m.attempts = m.attempts.incremented().incremented();

        let without_limit = Pipeline::new(None);
        assert_eq!(without_limit.process(&m, m.ts + 10), PipelineOutcome::PassThrough);

        let with_limit = Pipeline::new(Some(1));
        assert_eq!(with_limit.process(&m, m.ts + 10), PipelineOutcome::DeadLetter(DlqReason::MaxAttempts));
    }

    #[test]
    fn ttd_ge_ttl_is_expired_not_delayed() {
        let pipeline = Pipeline::new(None);
        let mut m = meta();
        m.ttl = Some(100);
        m.ttd = Some(200);
        assert_eq!(pipeline.process(&m, m.ts + 10), PipelineOutcome::DeadLetter(DlqReason::Expired));
    }
}
