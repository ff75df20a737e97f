//! Cooperative scheduling of script threads.
//!
//! [`Scheduler`] keeps a FIFO run queue of [`ScriptThread`]s.  One round
//! gives every queued thread one slice in queue order; threads that
//! suspended go to the back of the queue, finished ones are retired with
//! their result.  All threads run on the calling OS thread.
//!
//! ```rust
//! use std::rc::Rc;
//! use ani::sched::Scheduler;
//! use ani::script::{compile, ExprValue, ScriptThread, SimpleRegistry, SwitchPolicy};
//!
//! let mut sched = Scheduler::new();
//! for (name, src) in [("a", "int n = 0; while (n < 5) n++; return n;"), ("b", "return 2 * 21;")] {
//!     let mut reg = SimpleRegistry::new();
//!     let program = compile(src, &mut reg).unwrap();
//!     sched.spawn(ScriptThread::new(name, Rc::new(program), Rc::new(reg), SwitchPolicy::slice(2)));
//! }
//! assert!(sched.run_until_idle(None));
//! let b = sched.finished().iter().find(|f| f.name == "b").unwrap();
//! assert_eq!(b.result, Some(ExprValue::integer(42)));
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info};

use crate::script::{ExprValue, ScriptThread, ThreadStatus};

// ── Finished threads ──────────────────────────────────────────────────────

/// A thread that ran to completion.
#[derive(Debug, Clone)]
pub struct Finished {
    pub id: u32,
    pub name: String,
    /// Value of the top-level `return`, if any.
    pub result: Option<ExprValue>,
    /// Slices the thread needed.
    pub slices: u64,
}

struct Entry {
    id: u32,
    slices: u64,
    thread: ScriptThread,
}

/// What one round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub ran: usize,
    pub finished: usize,
}

// ── Scheduler ─────────────────────────────────────────────────────────────

pub struct Scheduler {
    queue: VecDeque<Entry>,
    finished: Vec<Finished>,
    next_id: u32,
    rounds: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), finished: Vec::new(), next_id: 1, rounds: 0 }
    }

    /// Queue a thread.  Returns its scheduler id.
    pub fn spawn(&mut self, thread: ScriptThread) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        info!(id, name = thread.name(), "thread spawned");
        self.queue.push_back(Entry { id, slices: 0, thread });
        id
    }

    /// Drop a queued thread without finishing it.  Returns `true` if found.
    pub fn kill(&mut self, id: u32) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| e.id != id);
        self.queue.len() < before
    }

    /// Threads still waiting to run.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn finished(&self) -> &[Finished] {
        &self.finished
    }

    /// Give every queued thread one slice.
    pub fn run_round(&mut self) -> RoundReport {
        let mut report = RoundReport::default();
        for _ in 0..self.queue.len() {
            let Some(mut entry) = self.queue.pop_front() else { break };
            entry.slices += 1;
            report.ran += 1;
            match entry.thread.exec() {
                ThreadStatus::Finished(result) => {
                    info!(id = entry.id, name = entry.thread.name(), slices = entry.slices, "thread finished");
                    report.finished += 1;
                    self.finished.push(Finished {
                        id: entry.id,
                        name: entry.thread.name().to_owned(),
                        result,
                        slices: entry.slices,
                    });
                }
                ThreadStatus::Suspended | ThreadStatus::Ready => self.queue.push_back(entry),
            }
        }
        self.rounds += 1;
        debug!(round = self.rounds, ran = report.ran, finished = report.finished, "round done");
        report
    }

    /// Run rounds until no thread is left or `max_rounds` is reached.
    /// Returns `true` when every thread finished.
    pub fn run_until_idle(&mut self, max_rounds: Option<u64>) -> bool {
        self.run_until_idle_with(max_rounds, |_| {})
    }

    /// [`Self::run_until_idle`] with a callback after each round.
    pub fn run_until_idle_with(&mut self, max_rounds: Option<u64>, mut after_round: impl FnMut(&RoundReport)) -> bool {
        let mut n = 0;
        while !self.is_empty() {
            if max_rounds.is_some_and(|m| n >= m) {
                return false;
            }
            let report = self.run_round();
            after_round(&report);
            n += 1;
        }
        true
    }

    /// Like [`Self::run_until_idle`], but one round per `tick`.
    /// `after_round` runs after each round.
    pub async fn run_paced(
        &mut self,
        tick: Duration,
        max_rounds: Option<u64>,
        mut after_round: impl FnMut(&RoundReport),
    ) -> bool {
        let mut interval = tokio::time::interval(tick);
        let mut n = 0;
        while !self.is_empty() {
            if max_rounds.is_some_and(|m| n >= m) {
                return false;
            }
            interval.tick().await;
            let report = self.run_round();
            after_round(&report);
            n += 1;
        }
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::registry::Output;
    use crate::script::{compile, SimpleRegistry, SwitchPolicy};
    use std::rc::Rc;

    fn thread(name: &str, src: &str, out: &Output, switch: SwitchPolicy) -> ScriptThread {
        let mut reg = SimpleRegistry::with_output(Rc::clone(out));
        let program = compile(src, &mut reg).unwrap();
        ScriptThread::new(name, Rc::new(program), Rc::new(reg), switch)
    }

    #[test]
    fn round_robin_interleaves_in_fifo_order() {
        let out = Output::default();
        let mut s = Scheduler::new();
        s.spawn(thread("a", "print(\"a1\"); print(\"a2\");", &out, SwitchPolicy::every_leaf()));
        s.spawn(thread("b", "print(\"b1\"); print(\"b2\");", &out, SwitchPolicy::every_leaf()));
        assert!(s.run_until_idle(None));
        assert_eq!(*out.borrow(), vec!["a1", "b1", "a2", "b2"]);
        assert_eq!(s.finished().len(), 2);
        assert_eq!(s.finished()[0].name, "a");
    }

    #[test]
    fn finished_threads_keep_their_result() {
        let out = Output::default();
        let mut s = Scheduler::new();
        s.spawn(thread("t", "int a = 20; return a + 1;", &out, SwitchPolicy::slice(1)));
        assert!(s.run_until_idle(None));
        let f = &s.finished()[0];
        assert_eq!(f.result, Some(ExprValue::integer(21)));
        assert!(f.slices > 1);
    }

    #[test]
    fn max_rounds_stops_early() {
        let out = Output::default();
        let mut s = Scheduler::new();
        s.spawn(thread("spin", "while (1) {}", &out, SwitchPolicy::slice(8)));
        assert!(!s.run_until_idle(Some(5)));
        assert_eq!(s.rounds(), 5);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn kill_removes_a_thread() {
        let out = Output::default();
        let mut s = Scheduler::new();
        let id = s.spawn(thread("x", "while (1) {}", &out, SwitchPolicy::slice(4)));
        assert!(s.kill(id));
        assert!(!s.kill(id));
        assert!(s.is_empty());
    }

    #[tokio::test]
    async fn paced_rounds_call_back() {
        let out = Output::default();
        let mut s = Scheduler::new();
        s.spawn(thread("p", "int i = 0; while (i < 3) i++;", &out, SwitchPolicy::slice(2)));
        let mut rounds = 0;
        assert!(s.run_paced(Duration::from_millis(1), None, |_| rounds += 1).await);
        assert_eq!(rounds as u64, s.rounds());
    }
}
