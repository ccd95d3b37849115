use serde_json::Value;
use tokio::runtime::Handle;

use super::{Completion, ContinuationProcessor, TriggerRequest, deliver};
use crate::script::{Trigger, TriggerError, TriggerKind};

/// Resumes with `null` once the requested delay has passed.
pub struct TimerProcessor {
    io: Handle,
}

impl TimerProcessor {
    pub fn new(io: Handle) -> Self {
        Self { io }
    }
}

impl ContinuationProcessor for TimerProcessor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Timer
    }

    fn perform(&self, request: TriggerRequest, completion: Completion) {
        let Trigger::Timer { delay } = request.trigger else {
            deliver(completion, Err(TriggerError::Abandoned));
            return;
        };

        self.io.spawn(async move {
            tokio::time::sleep(delay).await;
            deliver(completion, Ok(Value::Null));
        });
    }
}
