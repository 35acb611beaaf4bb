//! Per-job lifecycle.

use std::fmt;

/// `Created → Sent → Acked → Computing → {Done, Failed, TimedOut}`.
///
/// States only move forward; a terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Created,
    Sent,
    Acked,
    Computing,
    Done,
    Failed,
    TimedOut,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Sent => 1,
            JobState::Acked => 2,
            JobState::Computing => 3,
            JobState::Done | JobState::Failed | JobState::TimedOut => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    pub fn can_advance_to(self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Created => "created",
            JobState::Sent => "sent",
            JobState::Acked => "acked",
            JobState::Computing => "computing",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// A job's state with its transition history.
#[derive(Debug, Clone)]
pub struct JobLifecycle {
    state: JobState,
    history: Vec<JobState>,
}

impl Default for JobLifecycle {
    fn default() -> Self {
        Self {
            state: JobState::Created,
            history: vec![JobState::Created],
        }
    }
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut job = JobLifecycle::new();
        for next in [JobState::Sent, JobState::Acked, JobState::Computing, JobState::Done] {
            job.advance(next).unwrap();
        }
        assert_eq!(job.history().len(), 5);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn never_moves_backwards() {
        let mut job = JobLifecycle::new();
        job.advance(JobState::Computing).unwrap();
        assert!(job.advance(JobState::Sent).is_err());
        assert!(job.advance(JobState::Computing).is_err());
    }

    #[test]
    fn terminal_is_final() {
        let mut job = JobLifecycle::new();
        job.advance(JobState::Sent).unwrap();
        job.advance(JobState::TimedOut).unwrap();
        let err = job.advance(JobState::Done).unwrap_err();
        assert_eq!(err.from, JobState::TimedOut);
        assert!(job.advance(JobState::Failed).is_err());
    }

    #[test]
    fn failure_reachable_from_any_live_state() {
        for start in [JobState::Created, JobState::Sent, JobState::Acked, JobState::Computing] {
            assert!(start.can_advance_to(JobState::Failed), "{start}");
        }
    }
}
