use relique::job::JobTracker;
use relique::Orchestrator;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub tracker: JobTracker,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            tracker: JobTracker::new(),
        }
    }
}
