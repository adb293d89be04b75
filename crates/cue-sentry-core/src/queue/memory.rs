use super::{ClassificationJob, ControlChannel, ControlSignal, JobQueue};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    lanes: BTreeMap<i64, VecDeque<ClassificationJob>>,
    len: usize,
    control: Option<(ControlSignal, Instant)>,
}

impl State {
    fn pop(&mut self) -> Option<ClassificationJob> {
        let job = {
            let mut lane = self.lanes.last_entry()?;
            let job = lane.get_mut().pop_front();
            if lane.get().is_empty() {
                lane.remove();
            }
            job
        };
        if job.is_some() {
            self.len -= 1;
        }
        job
    }
}

/// Bounded in-process broker for single-process deployments and tests.
pub struct MemoryBroker {
    state: Mutex<State>,
    job_ready: Condvar,
    space_free: Condvar,
    capacity: usize,
    enqueue_wait: Duration,
}

impl MemoryBroker {
    pub fn new(capacity: usize, enqueue_wait: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            job_ready: Condvar::new(),
            space_free: Condvar::new(),
            capacity: capacity.max(1),
            enqueue_wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobQueue for MemoryBroker {
    fn enqueue(&self, job: ClassificationJob) -> Result<()> {
        let guard = self.lock();
        let (mut state, _) = self
            .space_free
            .wait_timeout_while(guard, self.enqueue_wait, |s| s.len >= self.capacity)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.len >= self.capacity {
            return Err(Error::QueueFull(self.capacity));
        }
        state.lanes.entry(job.priority).or_default().push_back(job);
        state.len += 1;
        drop(state);
        self.job_ready.notify_one();
        Ok(())
    }

    fn dequeue(&self, timeout: Duration) -> Result<Option<ClassificationJob>> {
        let guard = self.lock();
        let (mut state, _) = self
            .job_ready
            .wait_timeout_while(guard, timeout, |s| s.len == 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let job = state.pop();
        drop(state);
        if job.is_some() {
            self.space_free.notify_one();
        }
        Ok(job)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock().len)
    }
}

impl ControlChannel for MemoryBroker {
    fn signal(&self, signal: ControlSignal, ttl: Duration) -> Result<()> {
        self.lock().control = Some((signal, Instant::now() + ttl));
        Ok(())
    }

    fn current(&self) -> Result<Option<ControlSignal>> {
        let mut state = self.lock();
        match state.control {
            Some((signal, expires)) if Instant::now() < expires => Ok(Some(signal)),
            Some(_) => {
                state.control = None;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<()> {
        self.lock().control = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{RESCAN_PRIORITY, SCAN_PRIORITY};
    use std::sync::Arc;
    use std::thread;

    fn job(file_id: i64, priority: i64) -> ClassificationJob {
        ClassificationJob::new(file_id, &format!("/m/{}.srt", file_id), ".srt", priority)
    }

    #[test]
    fn test_priority_then_fifo() {
        let broker = MemoryBroker::new(10, Duration::from_millis(10));
        broker.enqueue(job(1, SCAN_PRIORITY)).unwrap();
        broker.enqueue(job(2, SCAN_PRIORITY)).unwrap();
        broker.enqueue(job(3, RESCAN_PRIORITY)).unwrap();

        let order: Vec<i64> = (0..3)
            .map(|_| broker.dequeue(Duration::ZERO).unwrap().unwrap().file_id)
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(broker.is_empty().unwrap());
    }

    #[test]
    fn test_dequeue_times_out_empty() {
        let broker = MemoryBroker::new(10, Duration::from_millis(10));
        let start = Instant::now();
        assert!(broker.dequeue(Duration::from_millis(50)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_full_queue_rejects() {
        let broker = MemoryBroker::new(1, Duration::from_millis(20));
        broker.enqueue(job(1, SCAN_PRIORITY)).unwrap();
        assert!(matches!(
            broker.enqueue(job(2, SCAN_PRIORITY)),
            Err(Error::QueueFull(1))
        ));
    }

    #[test]
    fn test_blocked_consumer_wakes_on_enqueue() {
        let broker = Arc::new(MemoryBroker::new(10, Duration::from_millis(10)));
        let consumer = {
            let broker = Arc::clone(&broker);
            thread::spawn(move || broker.dequeue(Duration::from_secs(5)).unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        broker.enqueue(job(9, SCAN_PRIORITY)).unwrap();
        assert_eq!(consumer.join().unwrap().map(|j| j.file_id), Some(9));
    }

    #[test]
    fn test_control_signal_expires() {
        let broker = MemoryBroker::new(10, Duration::from_millis(10));
        broker
            .signal(ControlSignal::Stop, Duration::from_millis(30))
            .unwrap();
        assert!(broker.is_paused().unwrap());
        thread::sleep(Duration::from_millis(60));
        assert_eq!(broker.current().unwrap(), None);
    }
}
